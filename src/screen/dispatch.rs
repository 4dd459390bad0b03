//! Selection protocol dispatch
//!
//! Every event passes through [`Shared::pre_dispatch`] before the external
//! handler sees it. Selection traffic for a bound clipboard is consumed here;
//! everything else goes on to the screen saver and then the handler's own
//! pre-dispatch hook.
//!
//! | Event                     | Action                                   | Consumed |
//! |---------------------------|------------------------------------------|----------|
//! | `MappingNotify`           | refresh keyboard mapping                 | no       |
//! | `SelectionClear`          | slot lost, receiver told                 | if bound |
//! | `SelectionNotify`         | delete the transfer property             | yes      |
//! | `SelectionRequest`        | queue on the slot                        | if bound |
//! | `PropertyNotify` (delete) | continue an incremental transfer         | yes      |
//! | `ClientMessage`           | screen saver on/off                      | if signal|
//! | `DestroyNotify`           | abort transfers to that window           | no       |

use tracing::{debug, warn};
use x11rb::protocol::xproto::Property;
use x11rb::protocol::Event;

use super::Shared;

impl Shared {
    /// Handle protocol events; true when the event needs no further handling
    pub(super) fn pre_dispatch(&self, event: &Event) -> bool {
        match event {
            Event::MappingNotify(ev) => {
                if let Some(display) = self.current_display() {
                    if let Err(e) = display.refresh_keyboard_mapping(ev) {
                        warn!("Failed to refresh keyboard mapping: {}", e);
                    }
                }
            }

            Event::SelectionClear(ev) => {
                let lost = {
                    let mut state = self.lock_state();
                    let id = state.slots.lookup_by_selection(ev.selection);
                    if let Some(id) = id {
                        debug!("lost clipboard {} ownership at time {}", id, ev.time);
                        if let Some(slot) = state.slots.get_mut(id) {
                            slot.lost(ev.time);
                        }
                    }
                    id
                };
                // someone else grabbed it; tell the receiver with no lock held
                if let Some(id) = lost {
                    self.receiver.on_grab_clipboard(id);
                    return true;
                }
            }

            Event::SelectionNotify(ev) => {
                if ev.property != x11rb::NONE {
                    let state = self.lock_state();
                    if let Some(display) = self.display_of(&state) {
                        if let Err(e) = display.delete_property(ev.requestor, ev.property) {
                            debug!("Failed to delete stray selection property: {}", e);
                        }
                    }
                }
                return true;
            }

            Event::SelectionRequest(ev) => {
                let mut state = self.lock_state();
                if let Some(id) = state.slots.lookup_by_selection(ev.selection) {
                    if let Some(slot) = state.slots.get_mut(id) {
                        slot.add_request(ev.owner, ev.requestor, ev.target, ev.time, ev.property);
                    }
                    return true;
                }
            }

            Event::PropertyNotify(ev) if ev.state == Property::DELETE => {
                self.state
                    .lock()
                    .slots
                    .process_request(ev.window, ev.time, ev.atom);
                return true;
            }

            Event::ClientMessage(ev) => {
                let signal = self.lock_state().screensaver_atom;
                if signal != x11rb::NONE && ev.type_ == signal && ev.format == 32 {
                    let activated = ev.data.as_data32()[0] != 0;
                    self.handler.on_screensaver(activated);
                    return true;
                }
            }

            Event::DestroyNotify(ev) => {
                self.lock_state().slots.destroy_request(ev.window);
            }

            _ => {}
        }

        {
            let mut state = self.lock_state();
            if let Some(saver) = state.screensaver.as_mut() {
                saver.on_pre_dispatch(event);
            }
        }

        self.handler.on_pre_dispatch(event)
    }
}

#[cfg(test)]
mod tests {
    use super::super::harness::{open_screen, passive_handler, quiet_receiver, WINDOW};
    use super::super::{MockScreenEventHandler, MockScreenReceiver};
    use crate::clipboard::ClipboardId;
    use crate::display::fake;
    use crate::display::DisplayConnection;
    use crate::screensaver::MockScreenSaver;
    use mockall::predicate::eq;
    use serial_test::serial;
    use x11rb::protocol::xproto::{Atom, EventMask};

    const PEER: u32 = 0x900;

    #[test]
    #[serial]
    fn test_selection_clear_notifies_receiver_once() {
        let mut receiver = MockScreenReceiver::new();
        receiver
            .expect_on_grab_clipboard()
            .with(eq(ClipboardId::Clipboard))
            .times(1)
            .return_const(());
        receiver.expect_on_error().never();

        let mut handler = MockScreenEventHandler::new();
        handler.expect_on_event().never();
        handler.expect_on_pre_dispatch().never();

        let (screen, display) = open_screen(receiver, handler, None);
        screen.set_window(Some(WINDOW)).unwrap();

        let clipboard = display.atom("CLIPBOARD");
        assert!(screen
            .shared
            .pre_dispatch(&fake::selection_clear(clipboard, WINDOW, 500)));
    }

    #[test]
    #[serial]
    fn test_selection_clear_for_unbound_selection_falls_through() {
        let mut receiver = quiet_receiver();
        receiver.expect_on_grab_clipboard().never();

        let mut handler = MockScreenEventHandler::new();
        handler
            .expect_on_pre_dispatch()
            .times(1)
            .return_const(false);

        let (screen, display) = open_screen(receiver, handler, None);
        // no window, so no slots
        let clipboard = display.atom("CLIPBOARD");
        assert!(!screen
            .shared
            .pre_dispatch(&fake::selection_clear(clipboard, WINDOW, 500)));
    }

    #[test]
    #[serial]
    fn test_unbound_selection_request_reaches_handler() {
        let mut handler = MockScreenEventHandler::new();
        handler
            .expect_on_pre_dispatch()
            .times(1)
            .return_const(false);
        handler.expect_on_event().times(1).return_const(());

        let (screen, display) = open_screen(quiet_receiver(), handler, None);
        screen.set_window(Some(WINDOW)).unwrap();

        let secondary = display.atom("SECONDARY");
        let target = display.atom("UTF8_STRING");
        display.push_event(fake::selection_request(
            WINDOW, PEER, secondary, target, target, 600,
        ));

        let dispatched = screen.shared.drain_events(&*display).unwrap();
        assert_eq!(dispatched, 1);
        assert!(display.notifies().is_empty());
    }

    #[test]
    #[serial]
    fn test_bound_selection_request_is_answered() {
        let mut handler = MockScreenEventHandler::new();
        handler.expect_on_pre_dispatch().never();
        handler.expect_on_event().never();

        let (screen, display) = open_screen(quiet_receiver(), handler, None);
        screen.set_window(Some(WINDOW)).unwrap();
        let mut src = crate::clipboard::MemoryClipboard::with_text("served");
        assert!(screen.set_clipboard(ClipboardId::Clipboard, Some(&mut src)));

        let clipboard = display.atom("CLIPBOARD");
        let target = display.atom("UTF8_STRING");
        let property: Atom = display.atom("PEER_PROP");
        let event = fake::selection_request(WINDOW, PEER, clipboard, target, property, u32::MAX);
        assert!(screen.shared.pre_dispatch(&event));

        assert_eq!(display.property(PEER, property).unwrap().data, b"served");
        assert_eq!(display.notifies().len(), 1);
    }

    #[test]
    #[serial]
    fn test_selection_notify_deletes_property() {
        let (screen, display) = open_screen(quiet_receiver(), passive_handler(), None);
        let property = display.atom("STRAY");
        display.change_property8(PEER, property, 31, b"x").unwrap();

        let event = x11rb::protocol::Event::SelectionNotify(
            x11rb::protocol::xproto::SelectionNotifyEvent {
                response_type: x11rb::protocol::xproto::SELECTION_NOTIFY_EVENT,
                sequence: 0,
                time: 0,
                requestor: PEER,
                selection: display.atom("CLIPBOARD"),
                target: 31,
                property,
            },
        );
        assert!(screen.shared.pre_dispatch(&event));
        assert!(display.property(PEER, property).is_none());
    }

    #[test]
    #[serial]
    fn test_property_delete_is_consumed() {
        let mut handler = MockScreenEventHandler::new();
        handler.expect_on_pre_dispatch().never();

        let (screen, display) = open_screen(quiet_receiver(), handler, None);
        screen.set_window(Some(WINDOW)).unwrap();
        assert!(screen
            .shared
            .pre_dispatch(&fake::property_deleted(PEER, display.atom("P"), 1)));
    }

    #[test]
    #[serial]
    fn test_screensaver_signal_requires_atom_and_format() {
        let mut handler = MockScreenEventHandler::new();
        handler
            .expect_on_screensaver()
            .with(eq(true))
            .times(1)
            .return_const(());
        handler
            .expect_on_screensaver()
            .with(eq(false))
            .times(1)
            .return_const(());
        // the two non-signal messages fall through
        handler
            .expect_on_pre_dispatch()
            .times(2)
            .return_const(false);

        let (screen, display) = open_screen(quiet_receiver(), handler, None);
        let signal = display.atom("SCREENSAVER");
        let other = display.atom("WM_PROTOCOLS");

        assert!(screen.shared.pre_dispatch(&fake::client_message(WINDOW, signal, 32, 1)));
        assert!(screen.shared.pre_dispatch(&fake::client_message(WINDOW, signal, 32, 0)));
        assert!(!screen.shared.pre_dispatch(&fake::client_message(WINDOW, other, 32, 1)));
        assert!(!screen.shared.pre_dispatch(&fake::client_message(WINDOW, signal, 8, 1)));
    }

    #[test]
    #[serial]
    fn test_mapping_notify_refreshes_and_falls_through() {
        let mut handler = MockScreenEventHandler::new();
        handler
            .expect_on_pre_dispatch()
            .times(1)
            .return_const(true);
        handler.expect_on_event().never();

        let (screen, display) = open_screen(quiet_receiver(), handler, None);
        display.push_event(fake::keyboard_mapping_changed());
        screen.shared.drain_events(&*display).unwrap();

        assert_eq!(display.keymap_refreshes(), 1);
        assert_eq!(display.keysym(38, 0), Some(0x61));
    }

    #[test]
    #[serial]
    fn test_destroy_notify_aborts_transfer_and_reaches_screensaver() {
        let mut saver = MockScreenSaver::new();
        saver
            .expect_on_pre_dispatch()
            .times(1)
            .return_const(false);

        let mut handler = MockScreenEventHandler::new();
        handler
            .expect_on_pre_dispatch()
            .times(1)
            .return_const(false);

        let (screen, display) = open_screen(quiet_receiver(), handler, Some(saver));
        // slots size their chunks when built
        display.set_max_request_bytes(256 + 4);
        screen.set_window(Some(WINDOW)).unwrap();

        let mut src = crate::clipboard::MemoryClipboard::with_text("a long clipboard text");
        assert!(screen.set_clipboard(ClipboardId::Clipboard, Some(&mut src)));
        let property = display.atom("PEER_PROP");
        let request = fake::selection_request(
            WINDOW,
            PEER,
            display.atom("CLIPBOARD"),
            display.atom("UTF8_STRING"),
            property,
            u32::MAX,
        );
        assert!(screen.shared.pre_dispatch(&request));
        assert!(display
            .selected_input(PEER)
            .is_some_and(|mask| mask.contains(EventMask::STRUCTURE_NOTIFY)));

        assert!(!screen.shared.pre_dispatch(&fake::destroy_notify(PEER)));

        // the transfer is gone, so a later deletion finds nothing to continue
        let before = display.calls();
        screen
            .shared
            .pre_dispatch(&fake::property_deleted(PEER, property, 2));
        assert_eq!(display.calls(), before);
    }

    #[test]
    #[serial]
    fn test_unrelated_event_consumed_by_handler_hook() {
        let mut handler = MockScreenEventHandler::new();
        handler
            .expect_on_pre_dispatch()
            .times(1)
            .return_const(true);
        handler.expect_on_event().never();

        let (screen, display) = open_screen(quiet_receiver(), handler, None);
        display.push_event(fake::expose(WINDOW));
        assert_eq!(screen.shared.drain_events(&*display).unwrap(), 1);
        assert_eq!(display.pending_events(), 0);
    }
}
