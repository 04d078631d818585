#[derive(Debug, Clone, Copy)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

pub(crate) const MULTI_PATH_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "estimate",
        action: "estimate",
    },
    CommandSpec {
        command: "analyze",
        action: "estimate",
    },
];

pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "profile",
        action: "set_profile",
    },
    CommandSpec {
        command: "export",
        action: "export",
    },
];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "clear",
        action: "clear",
    },
    CommandSpec {
        command: "help",
        action: "help",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
    },
    CommandSpec {
        command: "exit",
        action: "quit",
    },
];

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/estimate <image>...",
    "/clear",
    "/export [path]",
    "/profile <name>",
    "/help",
    "/quit",
];
