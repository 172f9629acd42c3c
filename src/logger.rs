use std::fs::{create_dir_all, File};
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Log event types that determine which receivers should log the message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogEvent {
    /// Output of worklet code itself (console_log)
    Worklet,
    /// Auction data (bids, scores, winner selection)
    Auction,
    /// Reporting data (reports, beacons, debug reports, aggregation)
    Report,
    /// Scenario-level data (per-auction summaries, individual checks)
    Scenario,
    /// Validation results (pass/fail messages, validation checks)
    Validation,
}

impl LogEvent {
    /// This event and every event above it
    /// Hierarchy: Worklet -> Auction -> Report -> Scenario -> Validation
    fn with_upward(self) -> &'static [LogEvent] {
        static ALL: [LogEvent; 5] = [LogEvent::Worklet, LogEvent::Auction, LogEvent::Report, LogEvent::Scenario, LogEvent::Validation];
        match self {
            LogEvent::Worklet => &ALL[0..],
            LogEvent::Auction => &ALL[1..],
            LogEvent::Report => &ALL[2..],
            LogEvent::Scenario => &ALL[3..],
            LogEvent::Validation => &ALL[4..],
        }
    }
}

/// Trait for log receivers that can receive log messages
pub trait LogReceiver {
    /// Check if this receiver should handle the given log event
    fn should_log(&self, event: LogEvent) -> bool;

    /// Write a string logged under `event` to this receiver
    fn write(&mut self, event: LogEvent, s: &str) -> io::Result<()>;

    /// Flush this receiver
    fn flush(&mut self) -> io::Result<()>;
}

/// Console log receiver (writes to stdout)
pub struct ConsoleReceiver {
    enabled_events: Vec<LogEvent>,
}

impl ConsoleReceiver {
    /// Create a new console receiver
    /// Returns a boxed receiver ready to be added to a logger
    pub fn new(enabled_events: Vec<LogEvent>) -> Box<dyn LogReceiver> {
        Box::new(Self { enabled_events })
    }
}

impl LogReceiver for ConsoleReceiver {
    fn should_log(&self, event: LogEvent) -> bool {
        self.enabled_events.contains(&event)
    }

    fn write(&mut self, _event: LogEvent, s: &str) -> io::Result<()> {
        print!("{}", s);
        io::stdout().flush()
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stdout().flush()
    }
}

/// File log receiver (writes to a file)
pub struct FileReceiver {
    file: File,
    enabled_events: Vec<LogEvent>,
}

impl FileReceiver {
    /// Create a new file receiver that writes to the specified path
    /// The file will be created (truncated if it exists) and parent directories will be created if needed
    pub fn new(path: &Path, enabled_events: Vec<LogEvent>) -> io::Result<Box<dyn LogReceiver>> {
        if let Some(parent) = path.parent() {
            create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        Ok(Box::new(Self { file, enabled_events }))
    }
}

impl LogReceiver for FileReceiver {
    fn should_log(&self, event: LogEvent) -> bool {
        self.enabled_events.contains(&event)
    }

    fn write(&mut self, _event: LogEvent, s: &str) -> io::Result<()> {
        write!(self.file, "{}", s)?;
        self.file.flush()
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Forwards log lines to `tracing`, so they reach whatever subscriber is installed
pub struct TracingReceiver {
    enabled_events: Vec<LogEvent>,
}

impl TracingReceiver {
    pub fn new(enabled_events: Vec<LogEvent>) -> Box<dyn LogReceiver> {
        Box::new(Self { enabled_events })
    }
}

impl LogReceiver for TracingReceiver {
    fn should_log(&self, event: LogEvent) -> bool {
        self.enabled_events.contains(&event)
    }

    fn write(&mut self, event: LogEvent, s: &str) -> io::Result<()> {
        let line = s.trim_end();
        if line.is_empty() {
            return Ok(());
        }
        if let Some(rest) = line.strip_prefix("ERROR ") {
            tracing::error!(target: "fledge", event = ?event, "{}", rest);
        } else if let Some(rest) = line.strip_prefix("WARNING ") {
            tracing::warn!(target: "fledge", event = ?event, "{}", rest);
        } else if event == LogEvent::Worklet {
            tracing::debug!(target: "fledge", event = ?event, "{}", line);
        } else {
            tracing::info!(target: "fledge", event = ?event, "{}", line);
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Unique identifier for a receiver
pub type ReceiverId = usize;

/// Global counter for generating unique receiver IDs
static RECEIVER_ID_COUNTER: AtomicUsize = AtomicUsize::new(1);

/// Main logger that manages multiple receivers
pub struct Logger {
    receivers: Vec<(ReceiverId, Box<dyn LogReceiver>)>,
}

impl Logger {
    /// Create a new logger with no receivers
    pub fn new() -> Self {
        Self { receivers: Vec::new() }
    }

    /// Add a receiver to the logger and return its unique ID
    pub fn add_receiver(&mut self, receiver: Box<dyn LogReceiver>) -> ReceiverId {
        let id = RECEIVER_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.receivers.push((id, receiver));
        id
    }

    /// Remove a receiver by its ID
    pub fn remove_receiver(&mut self, id: ReceiverId) {
        self.receivers.retain(|(receiver_id, _)| *receiver_id != id);
    }

    /// Write a message with a specific log event type
    pub fn log(&mut self, event: LogEvent, message: &str) -> io::Result<()> {
        for (_, receiver) in &mut self.receivers {
            if receiver.should_log(event) {
                receiver.write(event, message)?;
            }
        }
        Ok(())
    }

    /// Write a message with newline
    pub fn logln(&mut self, event: LogEvent, message: &str) -> io::Result<()> {
        self.log(event, &format!("{}\n", message))
    }

    /// Write a prefixed line to the specified event and all upward events
    /// Each receiver receives the message only once, even if it listens to multiple events
    fn log_with_prefix(&mut self, event: LogEvent, prefix: &str, message: &str) -> io::Result<()> {
        let events = event.with_upward();
        let formatted_message = format!("{} {}\n", prefix, message);
        for (_, receiver) in &mut self.receivers {
            if events.iter().any(|&evt| receiver.should_log(evt)) {
                receiver.write(event, &formatted_message)?;
            }
        }
        Ok(())
    }

    /// Write a message with newline to the specified event and all upward events
    /// Automatically prepends "ERROR" to the message
    pub fn errln(&mut self, event: LogEvent, message: &str) -> io::Result<()> {
        self.log_with_prefix(event, "ERROR", message)
    }

    /// Write a message with newline to the specified event and all upward events
    /// Automatically prepends "WARNING" to the message
    pub fn warnln(&mut self, event: LogEvent, message: &str) -> io::Result<()> {
        self.log_with_prefix(event, "WARNING", message)
    }

    /// Flush all receivers
    pub fn flush(&mut self) -> io::Result<()> {
        for (_, receiver) in &mut self.receivers {
            receiver.flush()?;
        }
        Ok(())
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

/// Sanitize a string to be used as a filename
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            ' ' | '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect()
}

/// Macro to log a formatted string (like println! but for logger)
#[macro_export]
macro_rules! logln {
    ($logger:expr, $event:expr, $($arg:tt)*) => {
        {
            let _ = $logger.logln($event, &format!($($arg)*));
        }
    };
}

/// Macro to log a formatted string without newline (like print! but for logger)
#[macro_export]
macro_rules! log {
    ($logger:expr, $event:expr, $($arg:tt)*) => {
        {
            let _ = $logger.log($event, &format!($($arg)*));
        }
    };
}

/// Macro to log a formatted string with newline to the specified event and all upward events
/// Hierarchy: Worklet -> Auction -> Report -> Scenario -> Validation
#[macro_export]
macro_rules! errln {
    ($logger:expr, $event:expr, $($arg:tt)*) => {
        {
            let _ = $logger.errln($event, &format!($($arg)*));
        }
    };
}

/// Macro to log a formatted string with newline to the specified event and all upward events
/// Hierarchy: Worklet -> Auction -> Report -> Scenario -> Validation
/// Automatically prepends "WARNING" to the message
#[macro_export]
macro_rules! warnln {
    ($logger:expr, $event:expr, $($arg:tt)*) => {
        {
            let _ = $logger.warnln($event, &format!($($arg)*));
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Capture {
        events: Vec<LogEvent>,
        lines: Rc<RefCell<Vec<String>>>,
    }

    impl LogReceiver for Capture {
        fn should_log(&self, event: LogEvent) -> bool {
            self.events.contains(&event)
        }

        fn write(&mut self, _event: LogEvent, s: &str) -> io::Result<()> {
            self.lines.borrow_mut().push(s.to_string());
            Ok(())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("test name"), "test_name");
        assert_eq!(sanitize_filename("test/name"), "test_name");
        assert_eq!(sanitize_filename("test:name"), "test_name");
    }

    #[test]
    fn test_errors_propagate_upward_once() {
        let lines = Rc::new(RefCell::new(Vec::new()));
        let mut logger = Logger::new();
        logger.add_receiver(Box::new(Capture { events: vec![LogEvent::Scenario, LogEvent::Validation], lines: lines.clone() }));
        logln!(logger, LogEvent::Auction, "bid {}", 1);
        errln!(logger, LogEvent::Auction, "scoreAd threw");
        warnln!(logger, LogEvent::Validation, "slow");
        assert_eq!(*lines.borrow(), vec!["ERROR scoreAd threw\n".to_string(), "WARNING slow\n".to_string()]);
    }

    #[test]
    fn test_removed_receiver_gets_nothing() {
        let lines = Rc::new(RefCell::new(Vec::new()));
        let mut logger = Logger::new();
        let id = logger.add_receiver(Box::new(Capture { events: vec![LogEvent::Report], lines: lines.clone() }));
        logln!(logger, LogEvent::Report, "first");
        logger.remove_receiver(id);
        logln!(logger, LogEvent::Report, "second");
        assert_eq!(lines.borrow().len(), 1);
    }
}
