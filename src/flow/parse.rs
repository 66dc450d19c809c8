use serde::Serialize;

use crate::models::{ActionKind, Direction, Point, RecordedAction, TapTarget};

use super::generate::APP_ID_PLACEHOLDER;

/// Maestro's own default swipe duration.
const DEFAULT_SWIPE_DURATION_MS: u64 = 400;
/// Maestro's default `waitForAnimationToEnd` timeout.
const DEFAULT_WAIT_SECS: f64 = 15.0;

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedFlow {
    pub app_id: Option<String>,
    pub actions: Vec<RecordedAction>,
}

/// A top-level `- verb` item whose indented parameters are still being read.
struct PendingBlock {
    verb: String,
    inline: Option<String>,
    params: Vec<(String, String)>,
}

impl PendingBlock {
    fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    /// An empty quoted scalar (`""`) is a value; a bare `key:` is not.
    fn inline_or(&self, key: &str) -> Option<String> {
        self.inline
            .clone()
            .or_else(|| self.param(key).map(str::to_string))
    }
}

/// Reconstruct actions from a flow script, purely from its text.
///
/// Only the subset of Maestro the recorder produces is understood; anything
/// else (unknown commands, comments, env blocks, malformed values) is skipped.
pub fn parse_flow(script: &str) -> ParsedFlow {
    let mut parsed = ParsedFlow::default();
    let mut kinds = Vec::new();
    let mut pending: Option<PendingBlock> = None;
    let mut in_header = true;

    for raw_line in script.lines() {
        let line = strip_comment(raw_line).trim_end();
        if line.trim().is_empty() {
            continue;
        }

        let indented = line.starts_with(' ') || line.starts_with('\t');
        let trimmed = line.trim();

        if !indented && trimmed == "---" {
            in_header = false;
            continue;
        }

        if !indented && (trimmed == "-" || trimmed.starts_with("- ")) {
            in_header = false;
            if let Some(block) = pending.take() {
                kinds.extend(finish_block(block));
            }
            pending = start_block(trimmed.trim_start_matches('-').trim());
            continue;
        }

        if in_header && !indented {
            if let Some((key, value)) = split_key_value(trimmed) {
                if key == "appId" {
                    let value = unquote(value);
                    if !value.is_empty() && value != APP_ID_PLACEHOLDER {
                        parsed.app_id = Some(value);
                    }
                }
            }
            continue;
        }

        if indented {
            if let Some(block) = pending.as_mut() {
                if let Some((key, value)) = split_key_value(trimmed) {
                    if !value.is_empty() {
                        block.params.push((key.to_string(), unquote(value)));
                    }
                }
            }
        }
    }

    if let Some(block) = pending.take() {
        kinds.extend(finish_block(block));
    }

    parsed.actions = kinds
        .into_iter()
        .enumerate()
        .map(|(index, kind)| {
            let kind = inherit_app_id(kind, parsed.app_id.as_deref());
            RecordedAction::new(format!("flow-{:04}", index + 1), kind)
        })
        .collect();

    parsed
}

fn start_block(item: &str) -> Option<PendingBlock> {
    if item.is_empty() {
        return None;
    }

    match split_key_value(item) {
        Some((verb, value)) => Some(PendingBlock {
            verb: verb.to_string(),
            inline: (!value.is_empty()).then(|| unquote(value)),
            params: Vec::new(),
        }),
        None => Some(PendingBlock {
            verb: item.to_string(),
            inline: None,
            params: Vec::new(),
        }),
    }
}

fn finish_block(block: PendingBlock) -> Option<ActionKind> {
    match block.verb.as_str() {
        "tapOn" => parse_target(&block).map(|target| ActionKind::Tap { target }),
        "longPressOn" => parse_target(&block).map(|target| ActionKind::LongPress { target }),
        "inputText" => block
            .inline_or("text")
            .map(|text| ActionKind::Input { text }),
        "swipe" => {
            let start = block.param("start").and_then(parse_point);
            let end = block.param("end").and_then(parse_point);
            match (start, end) {
                (Some(start), Some(end)) => Some(ActionKind::Swipe {
                    start,
                    end,
                    duration_ms: block
                        .param("duration")
                        .and_then(|value| value.parse().ok())
                        .unwrap_or(DEFAULT_SWIPE_DURATION_MS),
                }),
                _ => block
                    .param("direction")
                    .and_then(Direction::parse)
                    .map(|direction| ActionKind::Scroll { direction }),
            }
        }
        "scroll" => Some(ActionKind::Scroll {
            direction: Direction::Up,
        }),
        "back" => Some(ActionKind::Back),
        "pressKey" => block.inline.as_deref().map(|key| {
            if key.eq_ignore_ascii_case("home") {
                ActionKind::Home
            } else {
                ActionKind::PressKey {
                    key: key.to_string(),
                }
            }
        }),
        "launchApp" => Some(ActionKind::Launch {
            app_id: block.inline_or("appId"),
        }),
        "assertVisible" => block
            .inline_or("text")
            .map(|text| ActionKind::Assert { text }),
        "waitForAnimationToEnd" | "extendedWaitUntil" => {
            let seconds = block
                .param("timeout")
                .and_then(|value| value.parse::<u64>().ok())
                .map(|ms| ms as f64 / 1000.0)
                .unwrap_or(DEFAULT_WAIT_SECS);
            Some(ActionKind::Wait { seconds })
        }
        _ => None,
    }
}

fn parse_target(block: &PendingBlock) -> Option<TapTarget> {
    if let Some(text) = block.inline.clone() {
        return Some(TapTarget::Text(text));
    }
    if let Some(point) = block.param("point").and_then(parse_point) {
        return Some(TapTarget::Point(point));
    }
    if let Some(id) = block.param("id") {
        return Some(TapTarget::Id(id.to_string()));
    }
    block
        .param("text")
        .map(|text| TapTarget::Text(text.to_string()))
}

fn inherit_app_id(kind: ActionKind, header_app_id: Option<&str>) -> ActionKind {
    match kind {
        ActionKind::Launch { app_id: None } => ActionKind::Launch {
            app_id: header_app_id.map(str::to_string),
        },
        other => other,
    }
}

/// Absolute `"x,y"` coordinates. Percentage points are not representable.
fn parse_point(value: &str) -> Option<Point> {
    let (x, y) = value.split_once(',')?;
    Some(Point::new(x.trim().parse().ok()?, y.trim().parse().ok()?))
}

fn split_key_value(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once(':')?;
    let key = key.trim();
    if key.is_empty() || key.contains(' ') || key.starts_with('"') {
        return None;
    }
    Some((key, value.trim()))
}

fn unquote(value: &str) -> String {
    let value = value.trim();
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        let inner = &value[1..value.len() - 1];
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(ch) = chars.next() {
            if ch != '\\' {
                out.push(ch);
                continue;
            }
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        }
        return out;
    }
    if value.len() >= 2 && value.starts_with('\'') && value.ends_with('\'') {
        return value[1..value.len() - 1].replace("''", "'");
    }
    value.to_string()
}

/// Drop a trailing `# comment` that sits outside any quotes.
fn strip_comment(line: &str) -> &str {
    let mut in_double = false;
    let mut in_single = false;
    let mut escaped = false;
    let mut previous = ' ';

    for (index, ch) in line.char_indices() {
        if escaped {
            escaped = false;
            previous = ch;
            continue;
        }
        match ch {
            '\\' if in_double => escaped = true,
            '"' if !in_single => in_double = !in_double,
            '\'' if !in_double => in_single = !in_single,
            '#' if !in_double && !in_single && previous.is_whitespace() => {
                return &line[..index];
            }
            _ => {}
        }
        previous = ch;
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::generate::generate_flow;

    fn kinds(flow: &ParsedFlow) -> Vec<ActionKind> {
        flow.actions.iter().map(|a| a.kind.clone()).collect()
    }

    #[test]
    fn parses_native_recorder_output() {
        let script = r#"appId: com.example.shop
---
- launchApp
- tapOn: "Sign in"
- tapOn:
    id: "email_field"
- inputText: jane@example.com
- tapOn:
    point: "540,1650"
- swipe:
    start: "540,1800"
    end: "540,400"
    duration: 250
- back
"#;

        let parsed = parse_flow(script);
        assert_eq!(parsed.app_id.as_deref(), Some("com.example.shop"));
        assert_eq!(
            kinds(&parsed),
            vec![
                ActionKind::Launch {
                    app_id: Some("com.example.shop".into())
                },
                ActionKind::tap_text("Sign in"),
                ActionKind::Tap {
                    target: TapTarget::Id("email_field".into())
                },
                ActionKind::Input {
                    text: "jane@example.com".into()
                },
                ActionKind::tap_at(540, 1650),
                ActionKind::Swipe {
                    start: Point::new(540, 1800),
                    end: Point::new(540, 400),
                    duration_ms: 250,
                },
                ActionKind::Back,
            ]
        );
        assert_eq!(parsed.actions[0].id, "flow-0001");
        assert_eq!(parsed.actions[6].id, "flow-0007");
    }

    #[test]
    fn incomplete_swipe_and_unknown_verbs_are_dropped() {
        let script = "appId: a.b\n---\n\
                      - swipe:\n    start: \"1,2\"\n\
                      - runScript: setup.js\n\
                      - takeScreenshot: home\n\
                      # a comment\n\
                      - hideKeyboard\n\
                      - tapOn:\n    point: \"50%,50%\"\n\
                      - back\n";

        let parsed = parse_flow(script);
        assert_eq!(kinds(&parsed), vec![ActionKind::Back]);
    }

    #[test]
    fn placeholder_app_id_is_absent() {
        let parsed = parse_flow(&generate_flow(None, &[]));
        assert_eq!(parsed.app_id, None);
        assert!(parsed.actions.is_empty());
    }

    #[test]
    fn comments_inside_quotes_survive() {
        let parsed = parse_flow("---\n- inputText: \"issue #42\" # trailing\n");
        assert_eq!(
            kinds(&parsed),
            vec![ActionKind::Input {
                text: "issue #42".into()
            }]
        );
    }

    #[test]
    fn press_key_home_is_home() {
        let parsed = parse_flow("---\n- pressKey: home\n- pressKey: Enter\n");
        assert_eq!(
            kinds(&parsed),
            vec![
                ActionKind::Home,
                ActionKind::PressKey {
                    key: "Enter".into()
                }
            ]
        );
    }

    #[test]
    fn round_trip_recovers_every_generated_kind() {
        let samples = vec![
            ActionKind::tap_text("Continue"),
            ActionKind::Tap {
                target: TapTarget::Id("cart_button".into()),
            },
            ActionKind::tap_at(12, 34),
            ActionKind::Swipe {
                start: Point::new(500, 1500),
                end: Point::new(500, 300),
                duration_ms: 320,
            },
            ActionKind::Input {
                text: "quote \" and \\ backslash".into(),
            },
            ActionKind::Scroll {
                direction: Direction::Up,
            },
            ActionKind::Scroll {
                direction: Direction::Down,
            },
            ActionKind::Scroll {
                direction: Direction::Right,
            },
            ActionKind::LongPress {
                target: TapTarget::Point(Point::new(300, 700)),
            },
            ActionKind::LongPress {
                target: TapTarget::Text("Message".into()),
            },
            ActionKind::Back,
            ActionKind::Home,
            ActionKind::Launch { app_id: None },
            ActionKind::Launch {
                app_id: Some("com.android.settings".into()),
            },
            ActionKind::PressKey {
                key: "Enter".into(),
            },
            ActionKind::Assert {
                text: "Order placed".into(),
            },
            ActionKind::Wait { seconds: 2.5 },
            ActionKind::Input { text: String::new() },
            ActionKind::tap_text(""),
            ActionKind::Tap {
                target: TapTarget::Id(String::new()),
            },
            ActionKind::LongPress {
                target: TapTarget::Text(String::new()),
            },
            ActionKind::Assert {
                text: String::new(),
            },
            ActionKind::Launch {
                app_id: Some(String::new()),
            },
        ];

        for kind in samples {
            let flow = generate_flow(None, &[RecordedAction::new("act-0001", kind.clone())]);
            let parsed = parse_flow(&flow);
            assert_eq!(parsed.actions.len(), 1, "flow was:\n{flow}");
            assert_eq!(parsed.actions[0].kind, kind, "flow was:\n{flow}");
        }
    }

    #[test]
    fn normalized_actions_round_trip_exactly() {
        let recorded = vec![
            ActionKind::PressKey {
                key: " Enter ".into(),
            },
            ActionKind::PressKey { key: "Home".into() },
            ActionKind::Wait { seconds: 0.0004 },
            ActionKind::Wait { seconds: 0.0126 },
        ];

        for kind in recorded {
            let kind = kind.normalized();
            let flow = generate_flow(None, &[RecordedAction::new("act-0001", kind.clone())]);
            assert_eq!(kinds(&parse_flow(&flow)), vec![kind], "flow was:\n{flow}");
        }
    }

    #[test]
    fn bare_key_without_value_is_not_a_target() {
        let parsed = parse_flow("---\n- tapOn:\n    id:\n- inputText:\n- back\n");
        assert_eq!(kinds(&parsed), vec![ActionKind::Back]);
    }

    #[test]
    fn empty_text_actions_keep_their_place() {
        let actions = vec![
            RecordedAction::new("act-0001", ActionKind::tap_text("")),
            RecordedAction::new("act-0002", ActionKind::Back),
            RecordedAction::new("act-0003", ActionKind::Input { text: String::new() }),
        ];
        let flow = generate_flow(Some("com.shop"), &actions);
        let expected: Vec<_> = actions.iter().map(|a| a.kind.clone()).collect();
        assert_eq!(kinds(&parse_flow(&flow)), expected);
    }

    #[test]
    fn generated_blocks_match_action_count_and_order() {
        let actions: Vec<RecordedAction> = (0..25)
            .map(|i| {
                let kind = match i % 5 {
                    0 => ActionKind::tap_at(i, i * 2),
                    1 => ActionKind::Input {
                        text: format!("value {i}"),
                    },
                    2 => ActionKind::Back,
                    3 => ActionKind::Wait {
                        seconds: i as f64,
                    },
                    _ => ActionKind::Swipe {
                        start: Point::new(i, 0),
                        end: Point::new(i, 500),
                        duration_ms: 100,
                    },
                };
                RecordedAction::new(format!("act-{i:04}"), kind)
            })
            .collect();

        let flow = generate_flow(Some("com.shop"), &actions);
        let blocks = flow.lines().filter(|line| line.starts_with("- ")).count();
        assert_eq!(blocks, actions.len());

        let parsed = parse_flow(&flow);
        let expected: Vec<_> = actions.iter().map(|a| a.kind.clone()).collect();
        assert_eq!(kinds(&parsed), expected);
    }
}
