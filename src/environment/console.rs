use std::sync::{Arc, Mutex};

/// Where annotation and grouping lines go.
///
/// CI runners parse these lines from the process's stdout, so production
/// output bypasses `tracing` formatting entirely.
#[derive(Clone, Default)]
pub enum Console {
    #[default]
    Stdout,
    Captured(Arc<Mutex<Vec<String>>>),
}

impl Console {
    /// A console that records lines in memory.
    pub fn captured() -> (Self, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        (Console::Captured(Arc::clone(&lines)), lines)
    }

    pub fn line(&self, line: impl Into<String>) {
        let line = line.into();
        match self {
            Console::Stdout => println!("{line}"),
            Console::Captured(lines) => {
                if let Ok(mut lines) = lines.lock() {
                    lines.push(line);
                }
            }
        }
    }
}
