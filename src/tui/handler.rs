//! Keyboard dispatch: modal overlays first, then the focused view.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::app::{App, Modal, DETAIL, FROZEN, STOP};

pub fn handle_key_event(app: &mut App, key: KeyEvent) {
    // Ctrl-C asks for confirmation from anywhere
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.request_quit();
        return;
    }

    if !matches!(app.modal, Modal::None) {
        handle_modal_keys(app, key);
        return;
    }

    if app.is_set(DETAIL) {
        handle_detail_keys(app, key);
    } else {
        handle_brief_keys(app, key);
    }
}

fn handle_modal_keys(app: &mut App, key: KeyEvent) {
    match std::mem::replace(&mut app.modal, Modal::None) {
        Modal::None => {}
        Modal::Confirm { text, action } => match key.code {
            KeyCode::Enter | KeyCode::Char('y') | KeyCode::Char('o') => app.run_confirm(action),
            KeyCode::Esc | KeyCode::Char('n') | KeyCode::Char('q') => {}
            _ => app.modal = Modal::Confirm { text, action },
        },
        Modal::Form {
            title,
            label,
            mut input,
            action,
        } => match key.code {
            KeyCode::Enter => app.run_form(action, input),
            KeyCode::Esc => {}
            KeyCode::Backspace => {
                input.pop();
                app.modal = Modal::Form {
                    title,
                    label,
                    input,
                    action,
                };
            }
            KeyCode::Char(c) => {
                if c.is_ascii_graphic() || c == ' ' {
                    input.push(c);
                }
                app.modal = Modal::Form {
                    title,
                    label,
                    input,
                    action,
                };
            }
            _ => {
                app.modal = Modal::Form {
                    title,
                    label,
                    input,
                    action,
                };
            }
        },
        Modal::Help => match key.code {
            KeyCode::Esc | KeyCode::Char('q') => {}
            _ => app.modal = Modal::Help,
        },
    }
}

fn handle_detail_keys(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc | KeyCode::Char('q') => app.leave_detail(),
        KeyCode::Char('f') => app.toggle(FROZEN),
        KeyCode::Char('s') => app.toggle(STOP),
        KeyCode::Char('?') => app.show_help(),
        KeyCode::Down | KeyCode::Char('j') => {
            app.detail_scroll = app.detail_scroll.saturating_add(1)
        }
        KeyCode::Up | KeyCode::Char('k') => {
            app.detail_scroll = app.detail_scroll.saturating_sub(1)
        }
        KeyCode::Char('g') | KeyCode::Home => app.detail_scroll = 0,
        KeyCode::PageDown => {
            app.detail_scroll = app.detail_scroll.saturating_add(app.page_rows as u16)
        }
        KeyCode::PageUp => {
            app.detail_scroll = app.detail_scroll.saturating_sub(app.page_rows as u16)
        }
        _ => {}
    }
}

fn handle_brief_keys(app: &mut App, key: KeyEvent) {
    let page = app.page_rows as isize;
    match key.code {
        KeyCode::Char('f') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.move_selection(page)
        }
        KeyCode::Char('b') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.move_selection(-page)
        }
        KeyCode::Char('f') => app.toggle(FROZEN),
        KeyCode::Char('s') => app.toggle(STOP),
        KeyCode::Char('?') => app.show_help(),
        KeyCode::Enter => app.enter_detail(),
        KeyCode::Esc => app.prompt(""),
        KeyCode::Char('C') => app.request_clear(),
        KeyCode::Char('S') => app.request_save(),
        KeyCode::Char('L') => app.request_load(),
        KeyCode::Char('M') => app.toggle_multi_mode(),
        KeyCode::Char('m') => app.toggle_row_selection(),
        KeyCode::Char('r') => app.invert_selection(),
        KeyCode::Char('a') => app.select_all_or_none(),
        KeyCode::Char('c') => app.clear_selection(),
        KeyCode::Char('R') => app.request_replay(),
        KeyCode::Down | KeyCode::Char('j') => app.move_selection(1),
        KeyCode::Up | KeyCode::Char('k') => app.move_selection(-1),
        KeyCode::Char('g') | KeyCode::Home => app.select_first(),
        KeyCode::Char('G') | KeyCode::End => app.select_last(),
        KeyCode::PageDown => app.move_selection(page),
        KeyCode::PageUp => app.move_selection(-page),
        _ => {}
    }
}
