use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use winit::event::{DeviceEvent, ElementState, MouseButton, MouseScrollDelta, WindowEvent};
use winit::keyboard::{Key, NamedKey};

/// One-shot commands triggered by a key press.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputAction {
    TogglePicker,
    FocusFront,
    FocusBack,
    FocusSleeveLeft,
    FocusSleeveRight,
    ExportTextures,
    Quit,
    ModifierShift,
}

impl InputAction {
    fn from_str(value: &str) -> Option<Self> {
        match value {
            "toggle_picker" => Some(Self::TogglePicker),
            "focus_front" => Some(Self::FocusFront),
            "focus_back" => Some(Self::FocusBack),
            "focus_sleeve_left" => Some(Self::FocusSleeveLeft),
            "focus_sleeve_right" => Some(Self::FocusSleeveRight),
            "export_textures" => Some(Self::ExportTextures),
            "quit" => Some(Self::Quit),
            "modifier_shift" => Some(Self::ModifierShift),
            _ => None,
        }
    }

    /// Zone framed by a focus action.
    pub fn focus_zone(self) -> Option<&'static str> {
        match self {
            Self::FocusFront => Some("front"),
            Self::FocusBack => Some("back"),
            Self::FocusSleeveLeft => Some("sleeve_left"),
            Self::FocusSleeveRight => Some("sleeve_right"),
            _ => None,
        }
    }

    fn is_held(self) -> bool {
        matches!(self, Self::ModifierShift)
    }
}

/// Per-frame input state accumulated from winit events.
pub struct Input {
    bindings: InputBindings,
    pub mouse_delta: (f32, f32),
    pub wheel: f32,
    triggered: Vec<InputAction>,
    shift_held: bool,
    cursor_pos: Option<(f32, f32)>,
    left_clicked: bool,
    right_pressed: bool,
}

impl Input {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(path: impl AsRef<Path>) -> Self {
        Self::with_bindings(InputBindings::load_or_default(path))
    }

    fn with_bindings(bindings: InputBindings) -> Self {
        Self {
            bindings,
            mouse_delta: (0.0, 0.0),
            wheel: 0.0,
            triggered: Vec::new(),
            shift_held: false,
            cursor_pos: None,
            left_clicked: false,
            right_pressed: false,
        }
    }

    pub fn push(&mut self, ev: InputEvent) {
        match ev {
            InputEvent::Key { key, pressed } => self.apply_key_binding(&key, pressed),
            InputEvent::MouseMove { dx, dy } => {
                self.mouse_delta.0 += dx;
                self.mouse_delta.1 += dy;
            }
            InputEvent::Wheel { delta } => self.wheel += delta,
            InputEvent::MouseButton { button, pressed } => match button {
                MouseButton::Left => {
                    if pressed {
                        self.left_clicked = true;
                    }
                }
                MouseButton::Right => self.right_pressed = pressed,
                _ => {}
            },
            InputEvent::CursorPos { x, y } => self.cursor_pos = Some((x, y)),
            InputEvent::Other => {}
        }
    }

    pub fn clear_frame(&mut self) {
        self.mouse_delta = (0.0, 0.0);
        self.wheel = 0.0;
        self.left_clicked = false;
        self.triggered.clear();
    }

    pub fn consume_wheel_delta(&mut self) -> Option<f32> {
        if self.wheel.abs() > 0.0 {
            let d = self.wheel;
            self.wheel = 0.0;
            Some(d)
        } else {
            None
        }
    }

    /// Actions pressed since the last call, in press order.
    pub fn take_actions(&mut self) -> Vec<InputAction> {
        std::mem::take(&mut self.triggered)
    }

    pub fn take_left_click(&mut self) -> bool {
        std::mem::take(&mut self.left_clicked)
    }

    pub fn right_held(&self) -> bool {
        self.right_pressed
    }

    pub fn shift_held(&self) -> bool {
        self.shift_held
    }

    pub fn cursor_position(&self) -> Option<(f32, f32)> {
        self.cursor_pos
    }

    fn apply_key_binding(&mut self, key: &Key, pressed: bool) {
        let Some(binding_key) = InputKeyBinding::from_event_key(key) else {
            return;
        };
        let actions: Vec<_> = self.bindings.actions_for_key(&binding_key).collect();
        for action in actions {
            if action.is_held() {
                self.shift_held = pressed;
            } else if pressed {
                self.triggered.push(action);
            }
        }
    }
}

impl Default for Input {
    fn default() -> Self {
        Self::with_bindings(InputBindings::default())
    }
}

#[derive(Debug, Clone)]
struct InputBindings {
    key_to_actions: HashMap<InputKeyBinding, Vec<InputAction>>,
}

impl InputBindings {
    fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<InputConfigFile>(&contents) {
                Ok(config) => Self::with_overrides(config.into_overrides(&path.display().to_string())),
                Err(err) => {
                    log::warn!("failed to parse {}: {err}; using default key bindings", path.display());
                    Self::default()
                }
            },
            Err(err) => {
                log::debug!("no key bindings at {}: {err}; using defaults", path.display());
                Self::default()
            }
        }
    }

    fn with_overrides(overrides: HashMap<InputAction, Vec<InputKeyBinding>>) -> Self {
        let mut action_map = Self::default_action_map();
        for (action, keys) in overrides {
            if !keys.is_empty() {
                action_map.insert(action, keys);
            }
        }
        Self::from_action_map(action_map)
    }

    fn default_action_map() -> HashMap<InputAction, Vec<InputKeyBinding>> {
        use InputAction::*;
        HashMap::from([
            (TogglePicker, vec![InputKeyBinding::character("p")]),
            (FocusFront, vec![InputKeyBinding::character("1")]),
            (FocusBack, vec![InputKeyBinding::character("2")]),
            (FocusSleeveLeft, vec![InputKeyBinding::character("3")]),
            (FocusSleeveRight, vec![InputKeyBinding::character("4")]),
            (ExportTextures, vec![InputKeyBinding::character("e")]),
            (Quit, vec![InputKeyBinding::named(NamedKeyCode::Escape)]),
            (ModifierShift, vec![InputKeyBinding::named(NamedKeyCode::Shift)]),
        ])
    }

    fn from_action_map(action_map: HashMap<InputAction, Vec<InputKeyBinding>>) -> Self {
        let mut key_to_actions: HashMap<InputKeyBinding, Vec<InputAction>> = HashMap::new();
        for (action, keys) in action_map {
            for key in keys {
                key_to_actions.entry(key).or_default().push(action);
            }
        }
        Self { key_to_actions }
    }

    fn actions_for_key(&self, key: &InputKeyBinding) -> impl Iterator<Item = InputAction> + '_ {
        self.key_to_actions.get(key).into_iter().flatten().copied()
    }
}

impl Default for InputBindings {
    fn default() -> Self {
        Self::from_action_map(Self::default_action_map())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum InputKeyBinding {
    Character(String),
    Named(NamedKeyCode),
}

impl InputKeyBinding {
    fn character(ch: &str) -> Self {
        Self::Character(ch.to_lowercase())
    }

    fn named(named: NamedKeyCode) -> Self {
        Self::Named(named)
    }

    fn from_event_key(key: &Key) -> Option<Self> {
        match key {
            Key::Character(ch) if !ch.is_empty() => Some(Self::Character(ch.to_lowercase())),
            Key::Named(named) => NamedKeyCode::from_named_key(named).map(Self::Named),
            _ => None,
        }
    }

    fn from_config_value(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_lowercase();
        if let Some(named) = NamedKeyCode::from_str(&normalized) {
            return Some(Self::Named(named));
        }
        (normalized.chars().count() == 1).then_some(Self::Character(normalized))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum NamedKeyCode {
    Escape,
    Shift,
}

impl NamedKeyCode {
    fn from_named_key(key: &NamedKey) -> Option<Self> {
        match key {
            NamedKey::Escape => Some(Self::Escape),
            NamedKey::Shift => Some(Self::Shift),
            _ => None,
        }
    }

    fn from_str(value: &str) -> Option<Self> {
        match value {
            "escape" | "esc" => Some(Self::Escape),
            "shift" | "left_shift" | "right_shift" => Some(Self::Shift),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct InputConfigFile {
    #[serde(default)]
    bindings: HashMap<String, Vec<String>>,
}

impl InputConfigFile {
    fn into_overrides(self, origin: &str) -> HashMap<InputAction, Vec<InputKeyBinding>> {
        let mut overrides = HashMap::new();
        for (action_name, keys) in self.bindings {
            let Some(action) = InputAction::from_str(&action_name.trim().to_lowercase()) else {
                log::warn!("{origin}: unknown action '{action_name}', ignoring");
                continue;
            };
            let mut parsed = Vec::new();
            for key in keys {
                match InputKeyBinding::from_config_value(&key) {
                    Some(binding) => parsed.push(binding),
                    None => log::warn!("{origin}: unknown key '{key}' for action '{action_name}', ignoring"),
                }
            }
            if parsed.is_empty() {
                log::warn!("{origin}: action '{action_name}' has no valid keys, keeping defaults");
                continue;
            }
            overrides.insert(action, parsed);
        }
        overrides
    }
}

pub enum InputEvent {
    Key { key: Key, pressed: bool },
    MouseMove { dx: f32, dy: f32 },
    Wheel { delta: f32 },
    MouseButton { button: MouseButton, pressed: bool },
    CursorPos { x: f32, y: f32 },
    Other,
}

impl InputEvent {
    pub fn from_window_event(ev: &WindowEvent) -> Self {
        match ev {
            WindowEvent::MouseWheel { delta, .. } => {
                let d = match delta {
                    MouseScrollDelta::LineDelta(_, y) => *y,
                    MouseScrollDelta::PixelDelta(p) => p.y as f32 / 40.0,
                };
                InputEvent::Wheel { delta: d }
            }
            WindowEvent::CursorMoved { position, .. } => {
                InputEvent::CursorPos { x: position.x as f32, y: position.y as f32 }
            }
            WindowEvent::MouseInput { state, button, .. } => {
                InputEvent::MouseButton { button: *button, pressed: *state == ElementState::Pressed }
            }
            WindowEvent::KeyboardInput { event, .. } if !event.repeat => InputEvent::Key {
                key: event.logical_key.clone(),
                pressed: event.state == ElementState::Pressed,
            },
            _ => InputEvent::Other,
        }
    }

    pub fn from_device_event(ev: &DeviceEvent) -> Self {
        match ev {
            DeviceEvent::MouseMotion { delta: (dx, dy) } => InputEvent::MouseMove { dx: *dx as f32, dy: *dy as f32 },
            _ => InputEvent::Other,
        }
    }
}
