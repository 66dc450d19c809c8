use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

/// Finger movement direction, as Maestro's `swipe.direction` uses it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "UP",
            Direction::Down => "DOWN",
            Direction::Left => "LEFT",
            Direction::Right => "RIGHT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "UP" => Some(Direction::Up),
            "DOWN" => Some(Direction::Down),
            "LEFT" => Some(Direction::Left),
            "RIGHT" => Some(Direction::Right),
            _ => None,
        }
    }
}

/// What a tap or long-press is aimed at.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum TapTarget {
    Text(String),
    Id(String),
    Point(Point),
}

/// One user action. Each variant carries only the fields relevant to it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ActionKind {
    Tap {
        target: TapTarget,
    },
    Swipe {
        start: Point,
        end: Point,
        duration_ms: u64,
    },
    Input {
        text: String,
    },
    Scroll {
        direction: Direction,
    },
    LongPress {
        target: TapTarget,
    },
    Back,
    Home,
    Launch {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        app_id: Option<String>,
    },
    PressKey {
        key: String,
    },
    Assert {
        text: String,
    },
    Wait {
        seconds: f64,
    },
}

impl ActionKind {
    pub fn tap_at(x: i32, y: i32) -> Self {
        ActionKind::Tap {
            target: TapTarget::Point(Point::new(x, y)),
        }
    }

    pub fn tap_text(text: impl Into<String>) -> Self {
        ActionKind::Tap {
            target: TapTarget::Text(text.into()),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ActionKind::Tap { .. } => "tap",
            ActionKind::Swipe { .. } => "swipe",
            ActionKind::Input { .. } => "input",
            ActionKind::Scroll { .. } => "scroll",
            ActionKind::LongPress { .. } => "long-press",
            ActionKind::Back => "back",
            ActionKind::Home => "home",
            ActionKind::Launch { .. } => "launch",
            ActionKind::PressKey { .. } => "press-key",
            ActionKind::Assert { .. } => "assert",
            ActionKind::Wait { .. } => "wait",
        }
    }

    /// Bring an action to the form the flow format can carry exactly, so a
    /// recorded action equals what parsing its flow block returns.
    pub fn normalized(self) -> Self {
        match self {
            ActionKind::PressKey { key } => {
                let key = key.trim();
                if key.eq_ignore_ascii_case("home") {
                    ActionKind::Home
                } else {
                    ActionKind::PressKey {
                        key: key.to_string(),
                    }
                }
            }
            ActionKind::Wait { seconds } => ActionKind::Wait {
                seconds: Self::wait_millis(seconds) as f64 / 1000.0,
            },
            other => other,
        }
    }

    /// Whole milliseconds, the resolution flow timeouts have.
    pub fn wait_millis(seconds: f64) -> u64 {
        if !seconds.is_finite() {
            return 0;
        }
        (seconds.max(0.0) * 1000.0).round() as u64
    }

    /// Kinds that get a screenshot when recorded locally. Text entry, key
    /// presses and launches are matched by the native tool alone.
    pub fn carries_screenshot(&self) -> bool {
        matches!(
            self,
            ActionKind::Tap { .. }
                | ActionKind::Swipe { .. }
                | ActionKind::Scroll { .. }
                | ActionKind::LongPress { .. }
                | ActionKind::Back
                | ActionKind::Home
                | ActionKind::Assert { .. }
                | ActionKind::Wait { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecordedAction {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_path: Option<PathBuf>,
}

impl RecordedAction {
    pub fn new(id: impl Into<String>, kind: ActionKind) -> Self {
        Self {
            id: id.into(),
            timestamp: Utc::now(),
            kind,
            screenshot_path: None,
        }
    }

    pub fn has_screenshot(&self) -> bool {
        self.screenshot_path.is_some()
    }
}
