//! Gesture synthesis: high-level intents → ordered low-level step plans.
//!
//! Nothing here touches the wire.  [`plan`] takes a [`Gesture`] plus a
//! snapshot of the current device state ([`GestureContext`]) and returns a
//! [`GesturePlan`]: emulation starts and stops, input calls, frame commits,
//! waits and progress checkpoints, in the order the dispatcher must perform
//! them.
//!
//! # How a plan is shaped (for beginners)
//!
//! EI groups input events into *frames*.  Events in one frame happen "at the
//! same time" from the compositor's point of view; a new frame means time
//! has passed.  A left click therefore looks like:
//!
//! ```text
//! Start(pointer)
//! Emit(motion 100,200)  Emit(button LEFT down)  Frame(pointer)
//! Wait(10ms)
//! Emit(button LEFT up)                          Frame(pointer)
//! Checkpoint
//! Stop(pointer)
//! ```
//!
//! Steps name a device *role* (pointer, keyboard, touch) instead of a device
//! id.  The dispatcher resolves roles to devices, so one physical device can
//! serve both the pointer and keyboard roles.
//!
//! All validation (bounds, finger counts, unmapped characters, key names)
//! runs before the first step is produced, so a rejected gesture never
//! generates wire traffic.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use eis_core::domain::geometry::{interpolate, split_evenly, steps_for_distance};
use eis_core::{
    Capability, DisplayBounds, InterfaceKind, KeyCode, KeyMapper, Modifier, MouseButton, Point,
    ScrollAxis,
};

use crate::application::errors::InputError;

/// Value of one `scroll_discrete` wheel detent.
pub const DISCRETE_NOTCH: i32 = 120;

// ── Steps ─────────────────────────────────────────────────────────────────────

/// One low-level input call.  Coordinates are logical screen pixels.
#[derive(Debug, Clone, PartialEq)]
pub enum InputCall {
    Motion { x: f64, y: f64 },
    Button { code: u32, pressed: bool },
    /// Smooth scroll in pixels.
    Scroll { dx: f32, dy: f32 },
    /// Wheel scroll in 1/120 detent units.
    ScrollDiscrete { dx: i32, dy: i32 },
    ScrollStop { x: bool, y: bool },
    Key { code: u32, pressed: bool },
    TouchDown { id: u32, x: f64, y: f64 },
    TouchMotion { id: u32, x: f64, y: f64 },
    TouchUp { id: u32 },
}

impl InputCall {
    /// The device role that receives this call.
    pub fn capability(&self) -> Capability {
        match self {
            InputCall::Motion { .. }
            | InputCall::Button { .. }
            | InputCall::Scroll { .. }
            | InputCall::ScrollDiscrete { .. }
            | InputCall::ScrollStop { .. } => Capability::Pointer,
            InputCall::Key { .. } => Capability::Keyboard,
            InputCall::TouchDown { .. } | InputCall::TouchMotion { .. } | InputCall::TouchUp { .. } => {
                Capability::Touch
            }
        }
    }

    /// The device interface the call is sent on.
    pub fn interface(&self) -> InterfaceKind {
        match self {
            InputCall::Motion { .. } => InterfaceKind::PointerAbsolute,
            InputCall::Button { .. } => InterfaceKind::Button,
            InputCall::Scroll { .. }
            | InputCall::ScrollDiscrete { .. }
            | InputCall::ScrollStop { .. } => InterfaceKind::Scroll,
            InputCall::Key { .. } => InterfaceKind::Keyboard,
            InputCall::TouchDown { .. } | InputCall::TouchMotion { .. } | InputCall::TouchUp { .. } => {
                InterfaceKind::Touchscreen
            }
        }
    }
}

/// One entry of a [`GesturePlan`].
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Open an emulation session on the role's device.
    Start(Capability),
    Emit(InputCall),
    /// Commit the events emitted so far on the role's device.
    Frame(Capability),
    Wait(Duration),
    /// Close the emulation session on the role's device.
    Stop(Capability),
    /// One unit of committed progress (a click, a character, an
    /// interpolation step).  Counted into `completed_steps` on failure.
    Checkpoint,
}

/// The ordered steps of one gesture.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GesturePlan {
    pub steps: Vec<Step>,
    /// Where the pointer ends up, if the gesture moves it.
    pub pointer_after: Option<Point>,
}

impl GesturePlan {
    /// Input calls in order, without the bookkeeping steps.
    pub fn calls(&self) -> impl Iterator<Item = &InputCall> {
        self.steps.iter().filter_map(|s| match s {
            Step::Emit(call) => Some(call),
            _ => None,
        })
    }

    /// Number of progress checkpoints in the plan.
    pub fn checkpoints(&self) -> usize {
        self.steps.iter().filter(|s| matches!(s, Step::Checkpoint)).count()
    }

    /// Sum of all waits.
    pub fn total_wait(&self) -> Duration {
        self.steps
            .iter()
            .map(|s| match s {
                Step::Wait(d) => *d,
                _ => Duration::ZERO,
            })
            .sum()
    }

    /// Roles the plan emits input on, in canonical order.
    pub fn roles(&self) -> Vec<Capability> {
        let roles: BTreeSet<Capability> = self.calls().map(InputCall::capability).collect();
        roles.into_iter().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

// ── Context ───────────────────────────────────────────────────────────────────

/// What the synthesizer needs to know about one device role.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceView {
    pub emulating: bool,
    pub held_buttons: BTreeSet<u32>,
    pub held_keys: BTreeSet<u32>,
    pub live_touches: BTreeSet<u32>,
}

impl DeviceView {
    /// `true` if anything is still pressed or touching.
    pub fn holds_anything(&self) -> bool {
        !(self.held_buttons.is_empty() && self.held_keys.is_empty() && self.live_touches.is_empty())
    }
}

/// Fixed delays and step sizes used when synthesizing gestures.
#[derive(Debug, Clone, PartialEq)]
pub struct Timing {
    /// Between consecutive key or modifier events.
    pub key_gap: Duration,
    /// Between typed characters.
    pub char_gap: Duration,
    /// Press-to-release time of a click without an explicit hold.
    pub press_hold: Duration,
    /// Between clicks of a multi-click.
    pub click_interval: Duration,
    /// After positioning the pointer or pressing the drag button.
    pub settle: Duration,
    pub drag_max_step_px: f64,
    pub drag_min_steps: usize,
    pub drag_step_interval: Duration,
    pub scroll_step_interval: Duration,
    pub scroll_px_per_unit: f64,
    pub touch_min_steps: usize,
    pub touch_min_hold: Duration,
    /// Vertical distance between fingers of a multi-finger swipe.
    pub finger_spacing_px: f64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            key_gap: Duration::from_millis(10),
            char_gap: Duration::from_millis(20),
            press_hold: Duration::from_millis(10),
            click_interval: Duration::from_millis(50),
            settle: Duration::from_millis(20),
            drag_max_step_px: 10.0,
            drag_min_steps: 10,
            drag_step_interval: Duration::from_millis(10),
            scroll_step_interval: Duration::from_millis(10),
            scroll_px_per_unit: 15.0,
            touch_min_steps: 10,
            touch_min_hold: Duration::from_millis(10),
            finger_spacing_px: 20.0,
        }
    }
}

/// Snapshot of session state a plan is built against.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GestureContext {
    pub bounds: DisplayBounds,
    /// Last position this client moved the pointer to.
    pub pointer: Option<Point>,
    pub timing: Timing,
    /// Per-role device state.  A missing role reads as idle.
    pub devices: BTreeMap<Capability, DeviceView>,
}

impl GestureContext {
    pub fn view(&self, role: Capability) -> DeviceView {
        self.devices.get(&role).cloned().unwrap_or_default()
    }

    /// Modifiers currently held on the keyboard role.
    pub fn modifiers(&self) -> BTreeSet<Modifier> {
        let keyboard = self.view(Capability::Keyboard);
        [Modifier::Ctrl, Modifier::Alt, Modifier::Shift, Modifier::Super]
            .into_iter()
            .filter(|m| keyboard.held_keys.contains(&m.key().as_u32()))
            .collect()
    }
}

// ── Intents ───────────────────────────────────────────────────────────────────

/// An intermediate drag point with an optional pause.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Waypoint {
    pub point: Point,
    pub dwell_ms: u64,
}

/// A high-level input intent.
#[derive(Debug, Clone, PartialEq)]
pub enum Gesture {
    Move {
        x: f64,
        y: f64,
    },
    Click {
        x: f64,
        y: f64,
        button: MouseButton,
        count: u32,
        modifiers: Vec<Modifier>,
        hold_ms: u64,
    },
    ButtonDown {
        x: f64,
        y: f64,
        button: MouseButton,
    },
    ButtonUp {
        x: f64,
        y: f64,
        button: MouseButton,
    },
    Drag {
        from: Point,
        to: Point,
        waypoints: Vec<Waypoint>,
        button: MouseButton,
        modifiers: Vec<Modifier>,
    },
    Scroll {
        x: f64,
        y: f64,
        delta: i32,
        axis: ScrollAxis,
        discrete: bool,
        steps: u32,
    },
    /// Press and hold a key or combo (`"ctrl"`, `"shift+a"`).
    KeyDown {
        combo: String,
    },
    /// Release a key or combo, base key first.
    KeyUp {
        combo: String,
    },
    /// Press and release a combo such as `"ctrl+shift+t"`.
    KeyCombo {
        combo: String,
    },
    Type {
        text: String,
    },
    TouchTap {
        x: f64,
        y: f64,
        hold_ms: u64,
    },
    TouchSwipe {
        from: Point,
        to: Point,
        duration_ms: u64,
    },
    TouchPinch {
        center: Point,
        start_distance: f64,
        end_distance: f64,
        duration_ms: u64,
    },
    TouchMultiSwipe {
        from: Point,
        to: Point,
        fingers: u32,
        duration_ms: u64,
    },
}

impl Gesture {
    /// Operation name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Gesture::Move { .. } => "move",
            Gesture::Click { .. } => "click",
            Gesture::ButtonDown { .. } => "button_down",
            Gesture::ButtonUp { .. } => "button_up",
            Gesture::Drag { .. } => "drag",
            Gesture::Scroll { .. } => "scroll",
            Gesture::KeyDown { .. } => "key_down",
            Gesture::KeyUp { .. } => "key_up",
            Gesture::KeyCombo { .. } => "key_combo",
            Gesture::Type { .. } => "type",
            Gesture::TouchTap { .. } => "touch_tap",
            Gesture::TouchSwipe { .. } => "touch_swipe",
            Gesture::TouchPinch { .. } => "touch_pinch",
            Gesture::TouchMultiSwipe { .. } => "touch_multi_swipe",
        }
    }
}

/// Builds the step plan for `gesture` against `ctx`.
///
/// # Errors
///
/// Returns [`InputError::Validation`] for out-of-bounds coordinates,
/// invalid counts, finger numbers outside 2–5, unmapped characters and
/// unknown key names.  No plan is produced in that case.
pub fn plan(gesture: &Gesture, ctx: &GestureContext) -> Result<GesturePlan, InputError> {
    match gesture {
        Gesture::Move { x, y } => plan_move(ctx, Point::new(*x, *y)),
        Gesture::Click {
            x,
            y,
            button,
            count,
            modifiers,
            hold_ms,
        } => plan_click(ctx, Point::new(*x, *y), *button, *count, modifiers, *hold_ms),
        Gesture::ButtonDown { x, y, button } => plan_button_down(ctx, Point::new(*x, *y), *button),
        Gesture::ButtonUp { x, y, button } => plan_button_up(ctx, Point::new(*x, *y), *button),
        Gesture::Drag {
            from,
            to,
            waypoints,
            button,
            modifiers,
        } => plan_drag(ctx, *from, *to, waypoints, *button, modifiers),
        Gesture::Scroll {
            x,
            y,
            delta,
            axis,
            discrete,
            steps,
        } => plan_scroll(ctx, Point::new(*x, *y), *delta, *axis, *discrete, *steps),
        Gesture::KeyDown { combo } => plan_key_down(ctx, combo),
        Gesture::KeyUp { combo } => plan_key_up(ctx, combo),
        Gesture::KeyCombo { combo } => plan_key_combo(ctx, combo),
        Gesture::Type { text } => plan_type(ctx, text),
        Gesture::TouchTap { x, y, hold_ms } => plan_touch_tap(ctx, Point::new(*x, *y), *hold_ms),
        Gesture::TouchSwipe {
            from,
            to,
            duration_ms,
        } => plan_touch_swipe(ctx, *from, *to, *duration_ms),
        Gesture::TouchPinch {
            center,
            start_distance,
            end_distance,
            duration_ms,
        } => plan_touch_pinch(ctx, *center, *start_distance, *end_distance, *duration_ms),
        Gesture::TouchMultiSwipe {
            from,
            to,
            fingers,
            duration_ms,
        } => plan_touch_multi_swipe(ctx, *from, *to, *fingers, *duration_ms),
    }
}

// ── Plan builders ─────────────────────────────────────────────────────────────

fn plan_move(ctx: &GestureContext, target: Point) -> Result<GesturePlan, InputError> {
    check_bounds(ctx, target)?;

    let mut b = PlanBuilder::new(ctx);
    b.open(Capability::Pointer);
    b.emit(motion(target));
    b.frame(Capability::Pointer);
    b.checkpoint();
    b.close(Capability::Pointer);
    Ok(b.finish(Some(target)))
}

fn plan_click(
    ctx: &GestureContext,
    target: Point,
    button: MouseButton,
    count: u32,
    modifiers: &[Modifier],
    hold_ms: u64,
) -> Result<GesturePlan, InputError> {
    check_bounds(ctx, target)?;
    if count == 0 {
        return Err(InputError::Validation("click count must be at least 1".to_string()));
    }
    let code = button.evdev_code();
    check_button_free(ctx, code)?;

    let timing = &ctx.timing;
    let mut b = PlanBuilder::new(ctx);
    let pressed_mods = b.press_modifiers(modifiers);

    b.open(Capability::Pointer);
    for i in 0..count {
        let last = i + 1 == count;
        if i == 0 {
            b.emit(motion(target));
        }
        b.emit(InputCall::Button {
            code,
            pressed: true,
        });
        b.frame(Capability::Pointer);
        if last && hold_ms > 0 {
            b.wait(Duration::from_millis(hold_ms).max(timing.press_hold));
        } else {
            b.wait(timing.press_hold);
        }
        b.emit(InputCall::Button {
            code,
            pressed: false,
        });
        b.frame(Capability::Pointer);
        b.checkpoint();
        if !last {
            b.wait(timing.click_interval);
        }
    }
    b.close(Capability::Pointer);

    b.release_modifiers(&pressed_mods);
    Ok(b.finish(Some(target)))
}

fn plan_button_down(
    ctx: &GestureContext,
    target: Point,
    button: MouseButton,
) -> Result<GesturePlan, InputError> {
    check_bounds(ctx, target)?;
    let code = button.evdev_code();
    check_button_free(ctx, code)?;

    // The session stays open until the matching button_up.
    let mut b = PlanBuilder::new(ctx);
    b.open(Capability::Pointer);
    b.emit(motion(target));
    b.emit(InputCall::Button {
        code,
        pressed: true,
    });
    b.frame(Capability::Pointer);
    b.checkpoint();
    Ok(b.finish(Some(target)))
}

fn plan_button_up(
    ctx: &GestureContext,
    target: Point,
    button: MouseButton,
) -> Result<GesturePlan, InputError> {
    check_bounds(ctx, target)?;
    let code = button.evdev_code();

    // No Start here: releasing on an idle device is a state error the
    // tracker reports before anything is written.
    let mut b = PlanBuilder::new(ctx);
    b.emit(motion(target));
    b.emit(InputCall::Button {
        code,
        pressed: false,
    });
    b.frame(Capability::Pointer);
    b.checkpoint();

    let mut after = ctx.view(Capability::Pointer);
    after.held_buttons.remove(&code);
    if after.emulating && !after.holds_anything() {
        b.steps.push(Step::Stop(Capability::Pointer));
    }
    Ok(b.finish(Some(target)))
}

fn plan_drag(
    ctx: &GestureContext,
    from: Point,
    to: Point,
    waypoints: &[Waypoint],
    button: MouseButton,
    modifiers: &[Modifier],
) -> Result<GesturePlan, InputError> {
    check_bounds(ctx, from)?;
    for w in waypoints {
        check_bounds(ctx, w.point)?;
    }
    check_bounds(ctx, to)?;
    let code = button.evdev_code();
    check_button_free(ctx, code)?;

    let timing = &ctx.timing;
    let mut b = PlanBuilder::new(ctx);
    let pressed_mods = b.press_modifiers(modifiers);

    b.open(Capability::Pointer);
    b.emit(motion(from));
    b.emit(InputCall::Button {
        code,
        pressed: true,
    });
    b.frame(Capability::Pointer);
    b.wait(timing.settle);

    let mut start = from;
    let segments = waypoints
        .iter()
        .map(|w| (w.point, w.dwell_ms))
        .chain(std::iter::once((to, 0)));
    for (end, dwell_ms) in segments {
        let steps = steps_for_distance(
            start.distance_to(end),
            timing.drag_max_step_px,
            timing.drag_min_steps,
        );
        for p in interpolate(start, end, steps) {
            b.emit(motion(p));
            b.frame(Capability::Pointer);
            b.checkpoint();
            b.wait(timing.drag_step_interval);
        }
        if dwell_ms > 0 {
            b.wait(Duration::from_millis(dwell_ms));
        }
        start = end;
    }

    b.wait(timing.settle);
    b.emit(InputCall::Button {
        code,
        pressed: false,
    });
    b.frame(Capability::Pointer);
    b.close(Capability::Pointer);

    b.release_modifiers(&pressed_mods);
    Ok(b.finish(Some(to)))
}

fn plan_scroll(
    ctx: &GestureContext,
    target: Point,
    delta: i32,
    axis: ScrollAxis,
    discrete: bool,
    steps: u32,
) -> Result<GesturePlan, InputError> {
    check_bounds(ctx, target)?;
    if steps == 0 {
        return Err(InputError::Validation("scroll steps must be at least 1".to_string()));
    }

    let timing = &ctx.timing;
    let mut b = PlanBuilder::new(ctx);
    b.open(Capability::Pointer);
    b.emit(motion(target));
    b.frame(Capability::Pointer);
    b.wait(timing.settle);

    let parts = split_evenly(delta, steps as usize);
    let last_index = parts.len().saturating_sub(1);
    for (i, part) in parts.into_iter().enumerate() {
        if part != 0 {
            let call = if discrete {
                let value = part.saturating_mul(DISCRETE_NOTCH);
                match axis {
                    ScrollAxis::Vertical => InputCall::ScrollDiscrete { dx: 0, dy: value },
                    ScrollAxis::Horizontal => InputCall::ScrollDiscrete { dx: value, dy: 0 },
                }
            } else {
                let px = (f64::from(part) * timing.scroll_px_per_unit) as f32;
                match axis {
                    ScrollAxis::Vertical => InputCall::Scroll { dx: 0.0, dy: px },
                    ScrollAxis::Horizontal => InputCall::Scroll { dx: px, dy: 0.0 },
                }
            };
            b.emit(call);
            b.frame(Capability::Pointer);
        }
        b.checkpoint();
        if i < last_index {
            b.wait(timing.scroll_step_interval);
        }
    }

    b.emit(InputCall::ScrollStop { x: true, y: true });
    b.frame(Capability::Pointer);
    b.close(Capability::Pointer);
    Ok(b.finish(Some(target)))
}

fn plan_key_down(ctx: &GestureContext, combo: &str) -> Result<GesturePlan, InputError> {
    let parsed = KeyMapper::parse_combo(combo)?;
    let held = ctx.view(Capability::Keyboard).held_keys;

    let mut b = PlanBuilder::new(ctx);
    b.open(Capability::Keyboard);
    let keys: Vec<KeyCode> = parsed
        .press_order()
        .into_iter()
        .filter(|k| !held.contains(&k.as_u32()))
        .collect();
    b.key_sequence(&keys, true);
    b.checkpoint();
    Ok(b.finish(None))
}

fn plan_key_up(ctx: &GestureContext, combo: &str) -> Result<GesturePlan, InputError> {
    let parsed = KeyMapper::parse_combo(combo)?;
    let mut keys = parsed.press_order();
    keys.reverse();

    // Same rule as button_up: no Start, so an idle keyboard fails closed.
    let mut b = PlanBuilder::new(ctx);
    b.key_sequence(&keys, false);
    b.checkpoint();

    let mut after = ctx.view(Capability::Keyboard);
    for k in &keys {
        after.held_keys.remove(&k.as_u32());
    }
    if after.emulating && !after.holds_anything() {
        b.steps.push(Step::Stop(Capability::Keyboard));
    }
    Ok(b.finish(None))
}

fn plan_key_combo(ctx: &GestureContext, combo: &str) -> Result<GesturePlan, InputError> {
    let parsed = KeyMapper::parse_combo(combo)?;

    let mut b = PlanBuilder::new(ctx);
    let pressed_mods = b.press_modifiers(&parsed.modifiers);
    b.open(Capability::Keyboard);
    if let Some(key) = parsed.key {
        b.key_tap(key);
    }
    b.checkpoint();
    b.release_modifiers(&pressed_mods);
    b.close(Capability::Keyboard);
    Ok(b.finish(None))
}

fn plan_type(ctx: &GestureContext, text: &str) -> Result<GesturePlan, InputError> {
    let resolved = text
        .chars()
        .map(KeyMapper::resolve_char)
        .collect::<Result<Vec<_>, _>>()?;
    if resolved.is_empty() {
        return Ok(GesturePlan::default());
    }

    let timing = &ctx.timing;
    let shift_held = ctx.modifiers().contains(&Modifier::Shift);
    let shift = Modifier::Shift.key();

    let mut b = PlanBuilder::new(ctx);
    b.open(Capability::Keyboard);
    let last_index = resolved.len() - 1;
    for (i, (key, needs_shift)) in resolved.into_iter().enumerate() {
        let press_shift = needs_shift && !shift_held;
        if press_shift {
            b.key(shift, true);
            b.wait(timing.key_gap);
        }
        b.key_tap(key);
        if press_shift {
            b.wait(timing.key_gap);
            b.key(shift, false);
        }
        b.checkpoint();
        if i < last_index {
            b.wait(timing.char_gap);
        }
    }
    b.close(Capability::Keyboard);
    Ok(b.finish(None))
}

fn plan_touch_tap(ctx: &GestureContext, at: Point, hold_ms: u64) -> Result<GesturePlan, InputError> {
    check_bounds(ctx, at)?;
    let id = allocate_slots(ctx, 1)[0];

    let mut b = PlanBuilder::new(ctx);
    b.open(Capability::Touch);
    b.emit(InputCall::TouchDown {
        id,
        x: at.x,
        y: at.y,
    });
    b.frame(Capability::Touch);
    b.wait(Duration::from_millis(hold_ms).max(ctx.timing.touch_min_hold));
    b.emit(InputCall::TouchUp { id });
    b.frame(Capability::Touch);
    b.checkpoint();
    b.close(Capability::Touch);
    Ok(b.finish(None))
}

fn plan_touch_swipe(
    ctx: &GestureContext,
    from: Point,
    to: Point,
    duration_ms: u64,
) -> Result<GesturePlan, InputError> {
    check_bounds(ctx, from)?;
    check_bounds(ctx, to)?;
    let id = allocate_slots(ctx, 1)[0];
    let (steps, interval) = touch_schedule(&ctx.timing, duration_ms);

    let mut b = PlanBuilder::new(ctx);
    b.open(Capability::Touch);
    b.emit(InputCall::TouchDown {
        id,
        x: from.x,
        y: from.y,
    });
    b.frame(Capability::Touch);
    for p in interpolate(from, to, steps) {
        b.emit(InputCall::TouchMotion { id, x: p.x, y: p.y });
        b.frame(Capability::Touch);
        b.checkpoint();
        b.wait(interval);
    }
    b.emit(InputCall::TouchUp { id });
    b.frame(Capability::Touch);
    b.close(Capability::Touch);
    Ok(b.finish(None))
}

fn plan_touch_pinch(
    ctx: &GestureContext,
    center: Point,
    start_distance: f64,
    end_distance: f64,
    duration_ms: u64,
) -> Result<GesturePlan, InputError> {
    for d in [start_distance, end_distance] {
        if !d.is_finite() || d < 0.0 {
            return Err(InputError::Validation(format!(
                "pinch distance must be a non-negative number, got {d}"
            )));
        }
    }
    let widest = start_distance.max(end_distance) / 2.0;
    check_bounds(ctx, center.offset(-widest, 0.0))?;
    check_bounds(ctx, center.offset(widest, 0.0))?;

    let slots = allocate_slots(ctx, 2);
    let (a, c) = (slots[0], slots[1]);
    let (steps, interval) = touch_schedule(&ctx.timing, duration_ms);
    let half_start = start_distance / 2.0;
    let half_end = end_distance / 2.0;

    let mut b = PlanBuilder::new(ctx);
    b.open(Capability::Touch);
    b.emit(InputCall::TouchDown {
        id: a,
        x: center.x - half_start,
        y: center.y,
    });
    b.emit(InputCall::TouchDown {
        id: c,
        x: center.x + half_start,
        y: center.y,
    });
    b.frame(Capability::Touch);
    for i in 1..=steps {
        let t = i as f64 / steps as f64;
        let half = if i == steps {
            half_end
        } else {
            half_start + (half_end - half_start) * t
        };
        b.emit(InputCall::TouchMotion {
            id: a,
            x: center.x - half,
            y: center.y,
        });
        b.emit(InputCall::TouchMotion {
            id: c,
            x: center.x + half,
            y: center.y,
        });
        b.frame(Capability::Touch);
        b.checkpoint();
        b.wait(interval);
    }
    b.emit(InputCall::TouchUp { id: a });
    b.emit(InputCall::TouchUp { id: c });
    b.frame(Capability::Touch);
    b.close(Capability::Touch);
    Ok(b.finish(None))
}

fn plan_touch_multi_swipe(
    ctx: &GestureContext,
    from: Point,
    to: Point,
    fingers: u32,
    duration_ms: u64,
) -> Result<GesturePlan, InputError> {
    if !(2..=5).contains(&fingers) {
        return Err(InputError::Validation(format!(
            "multi-finger swipe needs 2 to 5 fingers, got {fingers}"
        )));
    }
    let count = fingers as usize;
    let spacing = ctx.timing.finger_spacing_px;
    let offsets: Vec<f64> = (0..count)
        .map(|f| (f as f64 - (count as f64 - 1.0) / 2.0) * spacing)
        .collect();
    for dy in &offsets {
        check_bounds(ctx, from.offset(0.0, *dy))?;
        check_bounds(ctx, to.offset(0.0, *dy))?;
    }

    let slots = allocate_slots(ctx, count);
    let (steps, interval) = touch_schedule(&ctx.timing, duration_ms);

    let mut b = PlanBuilder::new(ctx);
    b.open(Capability::Touch);
    for (id, dy) in slots.iter().zip(&offsets) {
        let p = from.offset(0.0, *dy);
        b.emit(InputCall::TouchDown {
            id: *id,
            x: p.x,
            y: p.y,
        });
    }
    b.frame(Capability::Touch);
    for anchor in interpolate(from, to, steps) {
        for (id, dy) in slots.iter().zip(&offsets) {
            let p = anchor.offset(0.0, *dy);
            b.emit(InputCall::TouchMotion {
                id: *id,
                x: p.x,
                y: p.y,
            });
        }
        b.frame(Capability::Touch);
        b.checkpoint();
        b.wait(interval);
    }
    for id in &slots {
        b.emit(InputCall::TouchUp { id: *id });
    }
    b.frame(Capability::Touch);
    b.close(Capability::Touch);
    Ok(b.finish(None))
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn motion(p: Point) -> InputCall {
    InputCall::Motion { x: p.x, y: p.y }
}

fn check_bounds(ctx: &GestureContext, p: Point) -> Result<(), InputError> {
    if ctx.bounds.contains(p) {
        Ok(())
    } else {
        let b = ctx.bounds;
        Err(InputError::Validation(format!(
            "({}, {}) is outside the display bounds {}x{}+{}+{}",
            p.x, p.y, b.width, b.height, b.x, b.y
        )))
    }
}

fn check_button_free(ctx: &GestureContext, code: u32) -> Result<(), InputError> {
    if ctx.view(Capability::Pointer).held_buttons.contains(&code) {
        return Err(InputError::Validation(format!(
            "button {code:#x} is already held; release it first"
        )));
    }
    Ok(())
}

/// Lowest `count` slot ids not currently live on the touch device.
fn allocate_slots(ctx: &GestureContext, count: usize) -> Vec<u32> {
    let live = ctx.view(Capability::Touch).live_touches;
    (0u32..).filter(|id| !live.contains(id)).take(count).collect()
}

/// `max(min_steps, duration / 10)` steps spread evenly over the duration.
fn touch_schedule(timing: &Timing, duration_ms: u64) -> (usize, Duration) {
    let steps = ((duration_ms / 10) as usize).max(timing.touch_min_steps).max(1);
    let interval = Duration::from_millis(duration_ms) / steps as u32;
    (steps, interval)
}

/// Accumulates steps and remembers which sessions the plan itself opened.
struct PlanBuilder<'a> {
    ctx: &'a GestureContext,
    steps: Vec<Step>,
    opened: BTreeSet<Capability>,
}

impl<'a> PlanBuilder<'a> {
    fn new(ctx: &'a GestureContext) -> Self {
        Self {
            ctx,
            steps: Vec::new(),
            opened: BTreeSet::new(),
        }
    }

    /// Adds a Start unless the role is already emulating.
    fn open(&mut self, role: Capability) {
        if !self.ctx.view(role).emulating && self.opened.insert(role) {
            self.steps.push(Step::Start(role));
        }
    }

    /// Adds a Stop only for sessions this plan opened.
    fn close(&mut self, role: Capability) {
        if self.opened.remove(&role) {
            self.steps.push(Step::Stop(role));
        }
    }

    fn emit(&mut self, call: InputCall) {
        self.steps.push(Step::Emit(call));
    }

    fn frame(&mut self, role: Capability) {
        self.steps.push(Step::Frame(role));
    }

    fn wait(&mut self, d: Duration) {
        if !d.is_zero() {
            self.steps.push(Step::Wait(d));
        }
    }

    fn checkpoint(&mut self) {
        self.steps.push(Step::Checkpoint);
    }

    fn key(&mut self, key: KeyCode, pressed: bool) {
        self.emit(InputCall::Key {
            code: key.as_u32(),
            pressed,
        });
        self.frame(Capability::Keyboard);
    }

    /// Press, frame, release, frame.  Press and release in one frame would
    /// cancel out.
    fn key_tap(&mut self, key: KeyCode) {
        self.key(key, true);
        self.wait(self.ctx.timing.key_gap);
        self.key(key, false);
    }

    fn key_sequence(&mut self, keys: &[KeyCode], pressed: bool) {
        for (i, key) in keys.iter().enumerate() {
            if i > 0 {
                self.wait(self.ctx.timing.key_gap);
            }
            self.key(*key, pressed);
        }
    }

    /// Presses the modifiers not already held and returns them.
    fn press_modifiers(&mut self, modifiers: &[Modifier]) -> Vec<Modifier> {
        let held = self.ctx.modifiers();
        let mut wanted: Vec<Modifier> = modifiers
            .iter()
            .copied()
            .filter(|m| !held.contains(m))
            .collect();
        wanted.sort();
        wanted.dedup();
        if wanted.is_empty() {
            return wanted;
        }

        self.open(Capability::Keyboard);
        for m in &wanted {
            self.key(m.key(), true);
            self.wait(self.ctx.timing.key_gap);
        }
        wanted
    }

    /// Releases `pressed` in reverse order and closes the keyboard session
    /// if this plan opened it.
    fn release_modifiers(&mut self, pressed: &[Modifier]) {
        if pressed.is_empty() {
            return;
        }
        for m in pressed.iter().rev() {
            self.wait(self.ctx.timing.key_gap);
            self.key(m.key(), false);
        }
        self.close(Capability::Keyboard);
    }

    fn finish(self, pointer_after: Option<Point>) -> GesturePlan {
        GesturePlan {
            steps: self.steps,
            pointer_after,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
