use std::fmt;

use crate::models::{ActionKind, Direction, RecordedAction, RecordingSession, TapTarget};

/// Written in place of a missing `appId`; the user has to fill it in.
pub const APP_ID_PLACEHOLDER: &str = "<your.app.id>";

const INDENT: &str = "    ";

/// Render a session's actions as a Maestro flow.
pub fn generate_session_flow(session: &RecordingSession) -> String {
    generate_flow(session.app_id.as_deref(), &session.actions)
}

/// Render actions as a Maestro flow: a header followed by exactly one
/// top-level `- ` block per action, in order.
pub fn generate_flow(app_id: Option<&str>, actions: &[RecordedAction]) -> String {
    FlowScript {
        header_app_id: app_id.filter(|id| !id.trim().is_empty()),
        actions,
    }
    .to_string()
}

struct FlowScript<'a> {
    header_app_id: Option<&'a str>,
    actions: &'a [RecordedAction],
}

impl fmt::Display for FlowScript<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "appId: {}", self.header_app_id.unwrap_or(APP_ID_PLACEHOLDER))?;
        writeln!(f, "---")?;
        for action in self.actions {
            write_block(f, &action.kind, self.header_app_id)?;
        }
        Ok(())
    }
}

fn write_block(
    out: &mut impl fmt::Write,
    kind: &ActionKind,
    header_app_id: Option<&str>,
) -> fmt::Result {
    match kind {
        ActionKind::Tap { target } => write_target(out, "tapOn", target),
        ActionKind::LongPress { target } => write_target(out, "longPressOn", target),
        ActionKind::Swipe {
            start,
            end,
            duration_ms,
        } => {
            writeln!(out, "- swipe:")?;
            writeln!(out, "{INDENT}start: \"{start}\"")?;
            writeln!(out, "{INDENT}end: \"{end}\"")?;
            writeln!(out, "{INDENT}duration: {duration_ms}")
        }
        ActionKind::Input { text } => writeln!(out, "- inputText: {}", quote(text)),
        // A bare `scroll` is an upward finger swipe; other directions need the
        // explicit form.
        ActionKind::Scroll {
            direction: Direction::Up,
        } => writeln!(out, "- scroll"),
        ActionKind::Scroll { direction } => {
            writeln!(out, "- swipe:")?;
            writeln!(out, "{INDENT}direction: {}", direction.as_str())
        }
        ActionKind::Back => writeln!(out, "- back"),
        ActionKind::Home => writeln!(out, "- pressKey: Home"),
        ActionKind::Launch { app_id } => match app_id.as_deref() {
            Some(id) if Some(id) != header_app_id => {
                writeln!(out, "- launchApp:")?;
                writeln!(out, "{INDENT}appId: {}", quote(id))
            }
            _ => writeln!(out, "- launchApp"),
        },
        ActionKind::PressKey { key } => writeln!(out, "- pressKey: {}", quote(key)),
        ActionKind::Assert { text } => writeln!(out, "- assertVisible: {}", quote(text)),
        ActionKind::Wait { seconds } => {
            writeln!(out, "- waitForAnimationToEnd:")?;
            writeln!(out, "{INDENT}timeout: {}", ActionKind::wait_millis(*seconds))
        }
    }
}

fn write_target(out: &mut impl fmt::Write, verb: &str, target: &TapTarget) -> fmt::Result {
    match target {
        TapTarget::Text(text) => writeln!(out, "- {verb}: {}", quote(text)),
        TapTarget::Id(id) => {
            writeln!(out, "- {verb}:")?;
            writeln!(out, "{INDENT}id: {}", quote(id))
        }
        TapTarget::Point(point) => {
            writeln!(out, "- {verb}:")?;
            writeln!(out, "{INDENT}point: \"{point}\"")
        }
    }
}

/// Double-quoted YAML scalar.
pub(crate) fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for ch in value.chars() {
        match ch {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\t' => quoted.push_str("\\t"),
            other => quoted.push(other),
        }
    }
    quoted.push('"');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Point;

    fn action(kind: ActionKind) -> RecordedAction {
        RecordedAction::new("act-0001", kind)
    }

    #[test]
    fn missing_app_id_emits_placeholder() {
        let flow = generate_flow(None, &[]);
        assert_eq!(flow, format!("appId: {APP_ID_PLACEHOLDER}\n---\n"));
    }

    #[test]
    fn text_tap_and_point_tap_use_different_instructions() {
        let flow = generate_flow(
            Some("com.shop"),
            &[
                action(ActionKind::tap_text("Log in")),
                action(ActionKind::tap_at(120, 640)),
            ],
        );

        assert_eq!(
            flow,
            "appId: com.shop\n---\n\
             - tapOn: \"Log in\"\n\
             - tapOn:\n    point: \"120,640\"\n"
        );
    }

    #[test]
    fn launch_matching_header_is_bare() {
        let flow = generate_flow(
            Some("com.shop"),
            &[
                action(ActionKind::Launch {
                    app_id: Some("com.shop".into()),
                }),
                action(ActionKind::Launch {
                    app_id: Some("com.settings".into()),
                }),
            ],
        );

        assert!(flow.contains("- launchApp\n"));
        assert!(flow.contains("- launchApp:\n    appId: \"com.settings\"\n"));
    }

    #[test]
    fn swipe_wait_and_scroll_blocks() {
        let flow = generate_flow(
            Some("com.shop"),
            &[
                action(ActionKind::Swipe {
                    start: Point::new(100, 900),
                    end: Point::new(100, 300),
                    duration_ms: 400,
                }),
                action(ActionKind::Scroll {
                    direction: Direction::Up,
                }),
                action(ActionKind::Scroll {
                    direction: Direction::Left,
                }),
                action(ActionKind::Wait { seconds: 1.5 }),
            ],
        );

        assert!(flow.contains(
            "- swipe:\n    start: \"100,900\"\n    end: \"100,300\"\n    duration: 400\n"
        ));
        assert!(flow.contains("- scroll\n"));
        assert!(flow.contains("- swipe:\n    direction: LEFT\n"));
        assert!(flow.contains("- waitForAnimationToEnd:\n    timeout: 1500\n"));
    }

    #[test]
    fn quotes_are_escaped() {
        assert_eq!(quote(r#"say "hi""#), r#""say \"hi\"""#);
        assert_eq!(quote("a\\b"), r#""a\\b""#);
    }
}
