//! Interpreter start-up options.

/// Options for starting an interpreter session.
///
/// ```
/// use holdfast::InitOptions;
///
/// let options = InitOptions::new()
///     .with_argv(["tool", "-X", "dev", "script"])
///     .install_signal_handlers(false);
/// assert!(options.parse_argv_enabled());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitOptions {
    pub(crate) install_signal_handlers: bool,
    pub(crate) parse_argv: bool,
    pub(crate) add_program_dir_to_path: bool,
    pub(crate) argv: Vec<String>,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            install_signal_handlers: true,
            parse_argv: true,
            add_program_dir_to_path: true,
            argv: Vec::new(),
        }
    }
}

impl InitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Command line handed to the runtime; `argv[0]` names the program.
    pub fn with_argv<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.argv = argv.into_iter().map(Into::into).collect();
        self
    }

    /// Let the runtime install its signal handlers.
    ///
    /// The bridge installs no handlers itself. The flag is recorded in the
    /// session's [`SysState`](crate::SysState) for the embedding runtime,
    /// which decides what to do with it.
    pub fn install_signal_handlers(mut self, enabled: bool) -> Self {
        self.install_signal_handlers = enabled;
        self
    }

    /// Consume interpreter options (`-X name[=value]`) from the command line.
    pub fn parse_argv(mut self, enabled: bool) -> Self {
        self.parse_argv = enabled;
        self
    }

    /// Prepend the program's directory to the module search path.
    pub fn add_program_dir_to_path(mut self, enabled: bool) -> Self {
        self.add_program_dir_to_path = enabled;
        self
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn signal_handlers_enabled(&self) -> bool {
        self.install_signal_handlers
    }

    pub fn parse_argv_enabled(&self) -> bool {
        self.parse_argv
    }

    pub fn program_dir_enabled(&self) -> bool {
        self.add_program_dir_to_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = InitOptions::default();
        assert!(options.signal_handlers_enabled());
        assert!(options.parse_argv_enabled());
        assert!(options.program_dir_enabled());
        assert!(options.argv().is_empty());
    }

    #[test]
    fn builder() {
        let options = InitOptions::new()
            .with_argv(vec!["prog".to_string()])
            .parse_argv(false)
            .add_program_dir_to_path(false);
        assert_eq!(options.argv(), ["prog".to_string()]);
        assert!(!options.parse_argv_enabled());
        assert!(!options.program_dir_enabled());
    }
}
