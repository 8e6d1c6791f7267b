//! Console output for the one-shot commands.

use colored::*;
use std::path::Path;

pub fn stylize_banner(content: &Path, style: &Path, iterations: Option<usize>) -> String {
    let title = "Style Transfer";
    let budget = iterations.map_or_else(|| "configured".to_string(), |n| n.to_string());
    format!(
        "\n{}\n{}\n  {} {}\n  {} {}\n  {} {}",
        title.bright_cyan().bold(),
        "=".repeat(title.len()).bright_cyan(),
        "Content:".yellow().bold(),
        content.display(),
        "Style:".yellow().bold(),
        style.display(),
        "Evaluations:".yellow().bold(),
        budget
    )
}

pub fn progress(text: &str) -> ColoredString {
    text.blue()
}

pub fn saved(output: &Path) -> ColoredString {
    format!("Saved {}", output.display()).green()
}

pub fn failed(error: &anyhow::Error) -> ColoredString {
    format!("Style transfer failed: {:#}", error).red().bold()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_banner_lists_inputs_and_budget() {
        colored::control::set_override(false);
        let banner = stylize_banner(Path::new("a.jpg"), Path::new("b.jpg"), Some(50));
        assert!(banner.contains("Style Transfer\n=============="));
        assert!(banner.contains("Content: a.jpg"));
        assert!(banner.contains("Style: b.jpg"));
        assert!(banner.contains("Evaluations: 50"));

        let default = stylize_banner(Path::new("a.jpg"), Path::new("b.jpg"), None);
        assert!(default.contains("Evaluations: configured"));
    }

    #[test]
    fn test_failure_keeps_error_chain() {
        colored::control::set_override(false);
        let error = anyhow::anyhow!("no such file").context("failed to read a.jpg");
        assert_eq!(
            failed(&error).to_string(),
            "Style transfer failed: failed to read a.jpg: no such file"
        );
    }
}
