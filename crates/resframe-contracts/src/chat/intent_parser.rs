use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{CommandSpec, MULTI_PATH_COMMANDS, NO_ARG_COMMANDS, RAW_ARG_COMMANDS};

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub message: Option<String>,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            message: None,
            command_args: BTreeMap::new(),
        }
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn parse_path_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

/// Maps one line of REPL input to an action.
///
/// Lines starting with `/name` are commands; anything else is a chat message.
pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let arg = slash_tail[command_len..].trim();

            if let Some(action) = find_action(&command, MULTI_PATH_COMMANDS) {
                let mut intent = Intent::new(action, text);
                intent.command_args.insert(
                    "paths".to_string(),
                    Value::Array(
                        parse_path_args(arg)
                            .into_iter()
                            .map(Value::String)
                            .collect(),
                    ),
                );
                return intent;
            }

            if let Some(action) = find_action(&command, RAW_ARG_COMMANDS) {
                let key = if action == "set_profile" { "profile" } else { "path" };
                let value = if action == "export" {
                    parse_path_args(arg).join(" ")
                } else {
                    arg.to_string()
                };
                let mut intent = Intent::new(action, text);
                intent
                    .command_args
                    .insert(key.to_string(), Value::String(value));
                return intent;
            }

            if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
                return Intent::new(action, text);
            }

            let mut intent = Intent::new("unknown", text);
            intent
                .command_args
                .insert("command".to_string(), Value::String(command));
            intent
                .command_args
                .insert("arg".to_string(), Value::String(arg.to_string()));
            return intent;
        }
    }

    let mut intent = Intent::new("message", text);
    intent.message = Some(raw_trimmed.to_string());
    intent
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::parse_intent;

    #[test]
    fn blank_input_is_noop() {
        assert_eq!(parse_intent("   \n").action, "noop");
    }

    #[test]
    fn plain_text_is_a_message() {
        let intent = parse_intent("  what about the roof?  ");
        assert_eq!(intent.action, "message");
        assert_eq!(intent.message.as_deref(), Some("what about the roof?"));
    }

    #[test]
    fn estimate_collects_quoted_paths() {
        let intent = parse_intent("/estimate plans/a.png \"/tmp/floor plan.jpg\"");
        assert_eq!(intent.action, "estimate");
        assert_eq!(
            intent.command_args["paths"],
            json!(["plans/a.png", "/tmp/floor plan.jpg"])
        );
    }

    #[test]
    fn analyze_is_an_alias_for_estimate() {
        let intent = parse_intent("/ANALYZE a.png");
        assert_eq!(intent.action, "estimate");
        assert_eq!(intent.command_args["paths"], json!(["a.png"]));
    }

    #[test]
    fn estimate_without_paths_yields_empty_list() {
        let intent = parse_intent("/estimate");
        assert_eq!(intent.command_args["paths"], json!([]));
    }

    #[test]
    fn export_path_is_optional() {
        assert_eq!(parse_intent("/export").command_args["path"], json!(""));
        assert_eq!(
            parse_intent("/export \"out dir/chat.txt\"").command_args["path"],
            json!("out dir/chat.txt")
        );
    }

    #[test]
    fn profile_and_no_arg_commands() {
        let intent = parse_intent("/profile construction_chat");
        assert_eq!(intent.action, "set_profile");
        assert_eq!(intent.command_args["profile"], json!("construction_chat"));
        assert_eq!(parse_intent("/clear").action, "clear");
        assert_eq!(parse_intent("/exit").action, "quit");
        assert_eq!(parse_intent("/help").action, "help");
    }

    #[test]
    fn unknown_command_keeps_name_and_arg() {
        let intent = parse_intent("/frobnicate now");
        assert_eq!(intent.action, "unknown");
        assert_eq!(intent.command_args["command"], json!("frobnicate"));
        assert_eq!(intent.command_args["arg"], json!("now"));
    }

    #[test]
    fn lone_slash_is_a_message() {
        let intent = parse_intent("/ 2x6 or 2x4?");
        assert_eq!(intent.action, "message");
    }
}
