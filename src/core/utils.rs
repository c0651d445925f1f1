//! Utilities module - Terminal status lines

use colored::*;

/// Print the tool banner
pub fn print_banner(tool: &str, tagline: &str) {
    println!("{}", format!("🥾 {}", tool).bright_cyan().bold());
    println!("{}", format!("   {}", tagline).bright_black());
    println!();
}

/// Print a step message
pub fn print_step(message: &str) {
    println!("   {} {}", "→".bright_blue(), message);
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("   {} {}", "✓".bright_green(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("   {} {}", "✗".bright_red(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("   {} {}", "⚠".bright_yellow(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("   {} {}", "ℹ".bright_cyan(), message);
}

/// Print a `label: value` line of a configuration summary
pub fn print_field(label: &str, value: &str) {
    println!("   {}: {}", label, value.bright_green());
}
