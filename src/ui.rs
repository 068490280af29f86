use colored::Colorize;

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Truncate a string for display, keeping the end
pub fn truncate_path(path: &str, max_len: usize) -> String {
    let len = path.chars().count();
    if len <= max_len {
        path.to_string()
    } else if max_len <= 3 {
        "...".to_string()
    } else {
        let tail: String = path.chars().skip(len - (max_len - 3)).collect();
        format!("...{tail}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_path_short() {
        assert_eq!(truncate_path("/etc/motd", 20), "/etc/motd");
    }

    #[test]
    fn test_truncate_path_long() {
        assert_eq!(
            truncate_path("File[/etc/httpd/conf.d/ssl.conf]", 16),
            "...f.d/ssl.conf]"
        );
    }

    #[test]
    fn test_truncate_path_tiny_limit() {
        assert_eq!(truncate_path("/very/long/path", 3), "...");
    }

    #[test]
    fn test_truncate_path_multibyte() {
        let truncated = truncate_path("/srv/données/très/long/chemin", 12);
        assert_eq!(truncated.chars().count(), 12);
        assert!(truncated.starts_with("..."));
    }
}
