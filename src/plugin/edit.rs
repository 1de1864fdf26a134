//! Parameter edit tracking.
//!
//! When the user drags a knob inside the plugin's own editor, the plugin
//! reports the gesture as `beginEdit` / `performEdit`* / `endEdit`.  The
//! tracker remembers the value each gesture started from so the host can
//! build undo steps, and forwards every step as a host notification.
//!
//! The tracker is shared (`Arc`) between the session and the backend's
//! component-handler object.  The audio thread never touches it.

use std::collections::HashMap;

use parking_lot::Mutex;

use super::events::{HostNotification, ParameterChange};
use super::notify::Notifier;
use super::types::ParamId;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterEditState {
    pub id: ParamId,
    pub initial_value: f64,
    pub current_value: f64,
    pub completed: bool,
}

pub struct EditTracker {
    edits: Mutex<HashMap<ParamId, ParameterEditState>>,
    /// id → plugin-assigned index, filled in as the host queries parameters.
    indices: Mutex<HashMap<ParamId, i32>>,
    notifier: Notifier,
}

impl EditTracker {
    pub fn new(notifier: Notifier) -> Self {
        Self {
            edits: Mutex::new(HashMap::new()),
            indices: Mutex::new(HashMap::new()),
            notifier,
        }
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    // -- edit gestures -----------------------------------------------------

    /// Accepted but not tracked; the first `perform_edit` opens the edit.
    pub fn begin_edit(&self, id: ParamId) {
        log::trace!("beginEdit({})", id);
    }

    pub fn perform_edit(&self, id: ParamId, value: f64) {
        let index = self.index_of(id);
        let change = {
            let mut edits = self.edits.lock();
            let state = edits.entry(id).or_insert(ParameterEditState {
                id,
                initial_value: value,
                current_value: value,
                completed: false,
            });
            state.current_value = value;
            ParameterChange {
                parameter_id: id,
                parameter_index: index,
                current_value: state.current_value,
                initial_value: state.initial_value,
                end_edit: false,
            }
        };
        self.notifier.notify(HostNotification::Parameter(change));
    }

    /// Closes the edit.  Without a matching edit the values are reported
    /// as `NaN`.
    pub fn end_edit(&self, id: ParamId) {
        let index = self.index_of(id);
        let finished = self.edits.lock().remove(&id).map(|mut state| {
            state.completed = true;
            state
        });
        let change = match finished {
            Some(state) => ParameterChange {
                parameter_id: id,
                parameter_index: index,
                current_value: state.current_value,
                initial_value: state.initial_value,
                end_edit: state.completed,
            },
            None => {
                log::debug!("endEdit({}) without a matching edit", id);
                ParameterChange {
                    parameter_id: id,
                    parameter_index: index,
                    current_value: f64::NAN,
                    initial_value: f64::NAN,
                    end_edit: true,
                }
            }
        };
        self.notifier.notify(HostNotification::Parameter(change));
    }

    /// Flag bits are not discriminated; any restart means "re-read the IO".
    pub fn restart_component(&self, flags: i32) {
        log::debug!("restartComponent(flags=0x{:x})", flags);
        self.notifier.notify(HostNotification::IoChanged);
    }

    pub fn set_dirty(&self) {
        self.notifier.notify(HostNotification::UpdateDisplay);
    }

    pub fn request_open_editor(&self) {
        self.notifier.notify(HostNotification::EditorOpenRequest);
    }

    pub fn request_close_editor(&self) {
        self.notifier.notify(HostNotification::EditorCloseRequest);
    }

    pub fn request_resize(&self, width: u32, height: u32) {
        self.notifier
            .notify(HostNotification::ResizeWindow { width, height });
    }

    // -- queries -----------------------------------------------------------

    pub fn edit_state(&self, id: ParamId) -> Option<ParameterEditState> {
        self.edits.lock().get(&id).copied()
    }

    pub fn active_edits(&self) -> usize {
        self.edits.lock().len()
    }

    // -- index cache -------------------------------------------------------

    pub fn record_index(&self, id: ParamId, index: usize) {
        let index = i32::try_from(index).unwrap_or(-1);
        self.indices.lock().insert(id, index);
    }

    /// `-1` until the host has queried the parameter.
    pub fn index_of(&self, id: ParamId) -> i32 {
        self.indices.lock().get(&id).copied().unwrap_or(-1)
    }

    pub fn clear_indices(&self) {
        self.indices.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::notify::{self, Notifications};

    fn tracker() -> (EditTracker, Notifications) {
        let (tx, rx) = notify::channel();
        (EditTracker::new(tx), rx)
    }

    fn changes(rx: &Notifications) -> Vec<ParameterChange> {
        rx.drain()
            .into_iter()
            .filter_map(|n| match n {
                HostNotification::Parameter(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_edit_gesture_emits_n_plus_one() {
        let (t, rx) = tracker();
        t.begin_edit(7);
        for v in [0.1, 0.2, 0.3, 0.4] {
            t.perform_edit(7, v);
        }
        t.end_edit(7);

        let got = changes(&rx);
        assert_eq!(got.len(), 5);
        assert!(got[..4].iter().all(|c| !c.end_edit));
        assert!(got[..4].iter().all(|c| c.initial_value == 0.1));
        assert_eq!(got[3].current_value, 0.4);

        let last = got[4];
        assert!(last.end_edit);
        assert_eq!(last.initial_value, 0.1);
        assert_eq!(last.current_value, 0.4);
        assert_eq!(t.active_edits(), 0);
    }

    #[test]
    fn test_end_without_begin_reports_nan() {
        let (t, rx) = tracker();
        t.end_edit(3);
        let got = changes(&rx);
        assert_eq!(got.len(), 1);
        assert!(got[0].end_edit);
        assert!(got[0].current_value.is_nan());
        assert!(got[0].initial_value.is_nan());
        assert!(t.edit_state(3).is_none());
    }

    #[test]
    fn test_duplicate_end_degrades() {
        let (t, rx) = tracker();
        t.perform_edit(1, 0.5);
        t.end_edit(1);
        t.end_edit(1);
        let got = changes(&rx);
        assert_eq!(got.len(), 3);
        assert_eq!(got[1].current_value, 0.5);
        assert!(got[2].current_value.is_nan());
    }

    #[test]
    fn test_one_state_per_id() {
        let (t, _rx) = tracker();
        t.perform_edit(1, 0.2);
        t.perform_edit(2, 0.9);
        t.perform_edit(1, 0.3);
        assert_eq!(t.active_edits(), 2);
        let s = t.edit_state(1).unwrap();
        assert_eq!(s.initial_value, 0.2);
        assert_eq!(s.current_value, 0.3);
        assert!(!s.completed);
    }

    #[test]
    fn test_begin_edit_is_silent() {
        let (t, rx) = tracker();
        t.begin_edit(4);
        assert!(rx.is_empty());
        assert_eq!(t.active_edits(), 0);
    }

    #[test]
    fn test_restart_component_always_io_changed() {
        let (t, rx) = tracker();
        for flags in [0, 1, 0x7fff, -1] {
            t.restart_component(flags);
            assert_eq!(rx.drain(), vec![HostNotification::IoChanged]);
        }
    }

    #[test]
    fn test_index_cache_feeds_notifications() {
        let (t, rx) = tracker();
        t.perform_edit(42, 0.5);
        t.record_index(42, 3);
        t.end_edit(42);
        let got = changes(&rx);
        assert_eq!(got[0].parameter_index, -1);
        assert_eq!(got[1].parameter_index, 3);
    }

    #[test]
    fn test_concurrent_edits_keep_one_state_per_id() {
        let (t, rx) = tracker();
        let t = std::sync::Arc::new(t);
        let handles: Vec<_> = (0..4)
            .map(|n| {
                let t = t.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        t.perform_edit(n, i as f64 / 100.0);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(t.active_edits(), 4);
        assert_eq!(changes(&rx).len(), 400);
    }
}
