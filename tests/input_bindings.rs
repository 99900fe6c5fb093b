use atelier::input::{Input, InputAction, InputEvent};
use std::io::Write;
use tempfile::NamedTempFile;
use winit::event::MouseButton;
use winit::keyboard::{Key, NamedKey};

#[test]
fn remapped_picker_toggle_overrides_default() {
    let mut temp = NamedTempFile::new().expect("temp input config");
    write!(temp, r#"{{"bindings":{{"toggle_picker":["k"],"focus_back":["b","9"]}}}}"#).expect("write remap config");

    let mut input = Input::from_config(temp.path());
    assert!(input.take_actions().is_empty(), "no events yet");

    input.push(InputEvent::Key { key: Key::Character("k".into()), pressed: true });
    assert_eq!(input.take_actions(), vec![InputAction::TogglePicker], "custom key toggles the picker");

    input.push(InputEvent::Key { key: Key::Character("p".into()), pressed: true });
    assert!(input.take_actions().is_empty(), "default key no longer fires when remapped");

    input.push(InputEvent::Key { key: Key::Character("9".into()), pressed: true });
    input.push(InputEvent::Key { key: Key::Character("1".into()), pressed: true });
    assert_eq!(input.take_actions(), vec![InputAction::FocusBack, InputAction::FocusFront]);
}

#[test]
fn shift_click_is_reported_as_held_modifier() {
    let mut input = Input::new();
    input.push(InputEvent::Key { key: Key::Named(NamedKey::Shift), pressed: true });
    input.push(InputEvent::CursorPos { x: 120.0, y: 48.0 });
    input.push(InputEvent::MouseButton { button: MouseButton::Left, pressed: true });
    assert!(input.take_actions().is_empty(), "modifiers are held, not triggered");
    assert!(input.shift_held());
    assert!(input.take_left_click());
    assert!(!input.take_left_click(), "click is consumed once");
    assert_eq!(input.cursor_position(), Some((120.0, 48.0)));

    input.push(InputEvent::Key { key: Key::Named(NamedKey::Shift), pressed: false });
    assert!(!input.shift_held());
}

#[test]
fn malformed_config_keeps_defaults() {
    let mut temp = NamedTempFile::new().expect("temp input config");
    write!(temp, "not json").expect("write config");
    let mut input = Input::from_config(temp.path());
    input.push(InputEvent::Key { key: Key::Named(NamedKey::Escape), pressed: true });
    assert_eq!(input.take_actions(), vec![InputAction::Quit]);
}
