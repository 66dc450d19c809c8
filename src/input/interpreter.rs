use serde::Serialize;
use std::time::Instant;

use crate::models::{ActionKind, Point, TapTarget};
use crate::settings::GestureSettings;

const RELEASED_TRACKING_ID: &str = "ffffffff";

/// A completed touch sequence or hardware key press.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "gesture", rename_all = "camelCase")]
pub enum Gesture {
    Tap { at: Point },
    Swipe { start: Point, end: Point, duration_ms: u64 },
    LongPress { at: Point, duration_ms: u64 },
    Back,
    Home,
}

impl Gesture {
    pub fn into_action(self) -> ActionKind {
        match self {
            Gesture::Tap { at } => ActionKind::Tap {
                target: TapTarget::Point(at),
            },
            Gesture::Swipe {
                start,
                end,
                duration_ms,
            } => ActionKind::Swipe {
                start,
                end,
                duration_ms,
            },
            Gesture::LongPress { at, .. } => ActionKind::LongPress {
                target: TapTarget::Point(at),
            },
            Gesture::Back => ActionKind::Back,
            Gesture::Home => ActionKind::Home,
        }
    }
}

/// Raw touch-panel axis maxima, used to scale reports into screen pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisRanges {
    pub max_x: i32,
    pub max_y: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenSize {
    pub width: i32,
    pub height: i32,
}

#[derive(Debug, Clone, Copy)]
struct TouchStart {
    at_ms: u64,
    raw_x: i32,
    raw_y: i32,
    /// Position reports for the new contact may trail the down event until
    /// the next SYN_REPORT.
    settled: bool,
}

/// Turns `getevent -lt` lines into gestures with a small state machine.
///
/// Classification is a heuristic: movement beyond the swipe threshold on either
/// axis is a swipe, otherwise holding longer than the long-press threshold is a
/// long press, otherwise a tap. Back and home keys are reported as soon as
/// they go down, independent of any touch in progress.
pub struct EventInterpreter {
    settings: GestureSettings,
    screen: Option<ScreenSize>,
    axes: Option<AxisRanges>,
    raw_x: i32,
    raw_y: i32,
    touch: Option<TouchStart>,
    clock: Instant,
}

impl EventInterpreter {
    pub fn new(settings: GestureSettings) -> Self {
        Self {
            settings,
            screen: None,
            axes: None,
            raw_x: 0,
            raw_y: 0,
            touch: None,
            clock: Instant::now(),
        }
    }

    pub fn with_scaling(mut self, screen: ScreenSize, axes: AxisRanges) -> Self {
        self.screen = Some(screen);
        self.axes = Some(axes);
        self
    }

    /// Feed one line of the event stream; returns a gesture when one completes.
    pub fn feed_line(&mut self, line: &str) -> Option<Gesture> {
        let (timestamp_ms, rest) = split_timestamp(line);
        let now_ms = timestamp_ms.unwrap_or_else(|| self.clock.elapsed().as_millis() as u64);

        // Skip the "/dev/input/eventN:" prefix when present.
        let body = match rest.find(": ") {
            Some(index) if rest[..index].starts_with('/') => &rest[index + 2..],
            _ => rest,
        };

        let mut fields = body.split_whitespace();
        let (event_type, code, value) = (fields.next()?, fields.next()?, fields.next()?);

        match (event_type, code) {
            ("EV_ABS", "ABS_MT_POSITION_X") | ("EV_ABS", "ABS_X") => {
                self.raw_x = parse_hex(value)?;
                None
            }
            ("EV_ABS", "ABS_MT_POSITION_Y") | ("EV_ABS", "ABS_Y") => {
                self.raw_y = parse_hex(value)?;
                None
            }
            ("EV_ABS", "ABS_MT_TRACKING_ID") => {
                if value.eq_ignore_ascii_case(RELEASED_TRACKING_ID) {
                    self.touch_up(now_ms)
                } else {
                    self.touch_down(now_ms);
                    None
                }
            }
            ("EV_KEY", "BTN_TOUCH") => match value {
                "DOWN" => {
                    self.touch_down(now_ms);
                    None
                }
                "UP" => self.touch_up(now_ms),
                _ => None,
            },
            ("EV_KEY", "KEY_BACK") if value == "DOWN" => Some(Gesture::Back),
            ("EV_KEY", "KEY_HOME") | ("EV_KEY", "KEY_HOMEPAGE") if value == "DOWN" => {
                Some(Gesture::Home)
            }
            ("EV_SYN", "SYN_REPORT") => {
                let (raw_x, raw_y) = (self.raw_x, self.raw_y);
                if let Some(touch) = self.touch.as_mut().filter(|touch| !touch.settled) {
                    touch.raw_x = raw_x;
                    touch.raw_y = raw_y;
                    touch.settled = true;
                }
                None
            }
            _ => None,
        }
    }

    fn touch_down(&mut self, now_ms: u64) {
        if self.touch.is_some() {
            return;
        }
        self.touch = Some(TouchStart {
            at_ms: now_ms,
            raw_x: self.raw_x,
            raw_y: self.raw_y,
            settled: false,
        });
    }

    fn touch_up(&mut self, now_ms: u64) -> Option<Gesture> {
        let mut touch = self.touch.take()?;
        if !touch.settled {
            touch.raw_x = self.raw_x;
            touch.raw_y = self.raw_y;
        }

        let start = self.to_screen(touch.raw_x, touch.raw_y);
        let end = self.to_screen(self.raw_x, self.raw_y);
        let elapsed_ms = now_ms.saturating_sub(touch.at_ms);
        let threshold = self.settings.swipe_threshold_px;

        let moved = (end.x - start.x).abs() > threshold || (end.y - start.y).abs() > threshold;
        if moved {
            return Some(Gesture::Swipe {
                start,
                end,
                duration_ms: elapsed_ms,
            });
        }
        if elapsed_ms > self.settings.long_press_ms {
            return Some(Gesture::LongPress {
                at: start,
                duration_ms: elapsed_ms,
            });
        }
        Some(Gesture::Tap { at: start })
    }

    fn to_screen(&self, raw_x: i32, raw_y: i32) -> Point {
        match (self.screen, self.axes) {
            (Some(screen), Some(axes)) if axes.max_x > 0 && axes.max_y > 0 => Point::new(
                scale(raw_x, axes.max_x, screen.width),
                scale(raw_y, axes.max_y, screen.height),
            ),
            _ => Point::new(raw_x, raw_y),
        }
    }
}

fn scale(raw: i32, axis_max: i32, screen: i32) -> i32 {
    ((raw as i64 * screen as i64) / (axis_max as i64 + 1)) as i32
}

fn parse_hex(value: &str) -> Option<i32> {
    u32::from_str_radix(value, 16).ok().map(|raw| raw as i32)
}

/// Split `[   51234.123456] rest` into milliseconds and the rest of the line.
fn split_timestamp(line: &str) -> (Option<u64>, &str) {
    let trimmed = line.trim_start();
    let Some(stripped) = trimmed.strip_prefix('[') else {
        return (None, trimmed);
    };
    let Some(close) = stripped.find(']') else {
        return (None, trimmed);
    };

    let stamp = stripped[..close].trim();
    let rest = stripped[close + 1..].trim_start();
    let millis = stamp.split_once('.').and_then(|(secs, frac)| {
        let secs: u64 = secs.parse().ok()?;
        let micros: u64 = format!("{frac:0<6}").get(..6)?.parse().ok()?;
        Some(secs * 1000 + micros / 1000)
    });
    (millis, rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interpreter() -> EventInterpreter {
        EventInterpreter::new(GestureSettings::default())
    }

    fn touch(secs: &str, x: i32, y: i32, down: bool) -> Vec<String> {
        let dev = "/dev/input/event1:";
        let mut lines = vec![
            format!("[{secs}] {dev} EV_ABS       ABS_MT_POSITION_X    {x:08x}"),
            format!("[{secs}] {dev} EV_ABS       ABS_MT_POSITION_Y    {y:08x}"),
        ];
        lines.push(format!(
            "[{secs}] {dev} EV_KEY       BTN_TOUCH            {}",
            if down { "DOWN" } else { "UP" }
        ));
        lines.push(format!("[{secs}] {dev} EV_SYN       SYN_REPORT           00000000"));
        lines
    }

    fn feed_all(interp: &mut EventInterpreter, lines: &[String]) -> Vec<Gesture> {
        lines.iter().filter_map(|line| interp.feed_line(line)).collect()
    }

    #[test]
    fn short_stationary_touch_is_a_tap() {
        let mut interp = interpreter();
        let mut lines = touch("  100.000000", 300, 800, true);
        lines.extend(touch("  100.080000", 302, 801, false));

        assert_eq!(
            feed_all(&mut interp, &lines),
            vec![Gesture::Tap {
                at: Point::new(300, 800)
            }]
        );
    }

    #[test]
    fn large_displacement_is_a_swipe() {
        let mut interp = interpreter();
        let mut lines = touch("  200.000000", 540, 1800, true);
        lines.push("[  200.100000] /dev/input/event1: EV_ABS ABS_MT_POSITION_Y 00000400".into());
        lines.extend(touch("  200.300000", 540, 400, false));

        assert_eq!(
            feed_all(&mut interp, &lines),
            vec![Gesture::Swipe {
                start: Point::new(540, 1800),
                end: Point::new(540, 400),
                duration_ms: 300,
            }]
        );
    }

    #[test]
    fn long_hold_without_movement_is_a_long_press() {
        let mut interp = interpreter();
        let mut lines = touch("  300.000000", 100, 100, true);
        lines.extend(touch("  301.500000", 104, 98, false));

        assert_eq!(
            feed_all(&mut interp, &lines),
            vec![Gesture::LongPress {
                at: Point::new(100, 100),
                duration_ms: 1500,
            }]
        );
    }

    #[test]
    fn keys_emit_immediately_even_mid_touch() {
        let mut interp = interpreter();
        let down = touch("  10.000000", 10, 10, true);
        assert!(feed_all(&mut interp, &down).is_empty());

        assert_eq!(
            interp.feed_line("[   10.010000] /dev/input/event0: EV_KEY KEY_BACK DOWN"),
            Some(Gesture::Back)
        );
        assert_eq!(
            interp.feed_line("[   10.020000] /dev/input/event0: EV_KEY KEY_BACK UP"),
            None
        );
        assert_eq!(
            interp.feed_line("/dev/input/event0: EV_KEY KEY_HOMEPAGE DOWN"),
            Some(Gesture::Home)
        );
    }

    #[test]
    fn tracking_id_release_ends_touch_without_btn_touch() {
        let mut interp = interpreter();
        let lines = vec![
            "[  5.000000] /dev/input/event1: EV_ABS ABS_MT_TRACKING_ID 00000001".to_string(),
            "[  5.000000] /dev/input/event1: EV_ABS ABS_MT_POSITION_X 00000064".to_string(),
            "[  5.000000] /dev/input/event1: EV_ABS ABS_MT_POSITION_Y 000000c8".to_string(),
            "[  5.000000] /dev/input/event1: EV_SYN SYN_REPORT 00000000".to_string(),
            "[  5.050000] /dev/input/event1: EV_ABS ABS_MT_TRACKING_ID ffffffff".to_string(),
        ];

        assert_eq!(
            feed_all(&mut interp, &lines),
            vec![Gesture::Tap {
                at: Point::new(100, 200)
            }]
        );
    }

    #[test]
    fn raw_axes_are_scaled_to_screen_pixels() {
        let mut interp = interpreter().with_scaling(
            ScreenSize {
                width: 1080,
                height: 2400,
            },
            AxisRanges {
                max_x: 32767,
                max_y: 32767,
            },
        );
        let mut lines = touch("  1.000000", 16384, 16384, true);
        lines.extend(touch("  1.050000", 16384, 16384, false));

        assert_eq!(
            feed_all(&mut interp, &lines),
            vec![Gesture::Tap {
                at: Point::new(540, 1200)
            }]
        );
    }

    #[test]
    fn garbage_lines_are_ignored() {
        let mut interp = interpreter();
        assert_eq!(interp.feed_line(""), None);
        assert_eq!(interp.feed_line("add device 1: /dev/input/event1"), None);
        assert_eq!(interp.feed_line("  name:     \"virtio_input\""), None);
        assert_eq!(
            interp.feed_line("/dev/input/event1: EV_ABS ABS_MT_POSITION_X zz"),
            None
        );
    }

    #[test]
    fn gesture_maps_to_action_kind() {
        assert_eq!(
            Gesture::LongPress {
                at: Point::new(1, 2),
                duration_ms: 900
            }
            .into_action(),
            ActionKind::LongPress {
                target: TapTarget::Point(Point::new(1, 2))
            }
        );
        assert_eq!(Gesture::Home.into_action(), ActionKind::Home);
    }
}
