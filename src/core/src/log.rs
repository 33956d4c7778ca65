//! Build-step logging — the `+ verb args` lines emitted as a script runs.

use console::style;

/// Writes build progress to stdout. Construction fixes whether output is
/// styled (tty) and whether step lines are emitted at all (quiet).
#[derive(Debug, Clone)]
pub struct StepLogger {
    tty: bool,
    quiet: bool,
}

impl StepLogger {
    pub fn new(tty: bool, quiet: bool) -> Self {
        StepLogger { tty, quiet }
    }

    pub fn quiet(&self) -> bool {
        self.quiet
    }

    /// Log a build step about to execute.
    pub fn step(&self, name: &str, args: &str) {
        if self.quiet {
            return;
        }
        if self.tty {
            println!("{} {} {}", style("+").cyan().bold(), style(name).bold(), args);
        } else {
            println!("+ {} {}", name, args);
        }
    }

    /// Log a step satisfied from the layer cache.
    pub fn cache_hit(&self, image_id: &str) {
        if self.quiet {
            return;
        }
        if self.tty {
            println!("  {} {}", style("cached").green(), short_id(image_id));
        } else {
            println!("  cached {}", short_id(image_id));
        }
    }

    /// Log a freeform message (pull progress, `puts` output).
    pub fn message(&self, text: &str) {
        if self.quiet {
            return;
        }
        println!("{}", text);
    }
}

/// Truncate an image id for display, stripping any digest prefix.
fn short_id(id: &str) -> &str {
    let id = id.strip_prefix("sha256:").unwrap_or(id);
    &id[..id.len().min(12)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id_truncates() {
        assert_eq!(short_id("0123456789abcdef0123"), "0123456789ab");
    }

    #[test]
    fn test_short_id_strips_digest_prefix() {
        assert_eq!(short_id("sha256:0123456789abcdef0123"), "0123456789ab");
    }

    #[test]
    fn test_short_id_short_input() {
        assert_eq!(short_id("abc"), "abc");
    }
}
