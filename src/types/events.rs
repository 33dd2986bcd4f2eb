use busgate_core::types::ModuleDetails;
pub use busgate_core::types::events::*;
use tokio::sync::broadcast;

// The size of the broadcast channel buffer.
const CHANNEL_CAPACITY: usize = 100;

// Macro to generate EventBus fields and constructor
macro_rules! define_event_bus {
    ($(($field:ident, $type:ty)),* $(,)?) => {
        /// Broadcast fan-out of session events.
        ///
        /// `all` carries every event; the typed channels carry one kind each
        /// for consumers that only care about that kind.
        #[derive(Debug)]
        pub struct EventBus {
            pub all: broadcast::Sender<Event>,
            $(
                pub $field: broadcast::Sender<$type>,
            )*
        }

        impl EventBus {
            pub fn new() -> Self {
                Self {
                    all: broadcast::channel(CHANNEL_CAPACITY).0,
                    $(
                        $field: broadcast::channel(CHANNEL_CAPACITY).0,
                    )*
                }
            }
        }
    };
}

define_event_bus! {
    (value_update, ValueUpdate),
    (ack, DeviceAck),
    (status, StatusReport),
    (detail_ack, ModuleDetails),
    (lcd_text, LcdText),
    (command_observed, CommandObserved),
    (auth_result, AuthResult),
    (connection_state, ConnectionState),
}

impl EventBus {
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.all.subscribe()
    }

    /// Sends to `all` and to the typed channel. Having no subscribers is fine.
    pub fn dispatch(&self, event: &Event) {
        let _ = self.all.send(event.clone());
        match event {
            Event::ValueUpdate(e) => {
                let _ = self.value_update.send(e.clone());
            }
            Event::Ack(e) => {
                let _ = self.ack.send(e.clone());
            }
            Event::Status(e) => {
                let _ = self.status.send(e.clone());
            }
            Event::DetailAck(e) => {
                let _ = self.detail_ack.send(e.clone());
            }
            Event::LcdText(e) => {
                let _ = self.lcd_text.send(e.clone());
            }
            Event::CommandObserved(e) => {
                let _ = self.command_observed.send(e.clone());
            }
            Event::AuthResult(e) => {
                let _ = self.auth_result.send(*e);
            }
            Event::ConnectionStateChanged(state) => {
                let _ = self.connection_state.send(*state);
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use busgate_core::Address;

    #[tokio::test]
    async fn test_dispatch_reaches_all_and_typed_channel() {
        let bus = EventBus::new();
        let mut all = bus.subscribe();
        let mut acks = bus.ack.subscribe();
        let mut states = bus.connection_state.subscribe();

        let ack = DeviceAck {
            source: Address::Object(4),
            object: 0,
            command: 0x04,
            status: 0,
        };
        bus.dispatch(&Event::Ack(ack.clone()));

        assert_eq!(all.recv().await.unwrap(), Event::Ack(ack.clone()));
        assert_eq!(acks.recv().await.unwrap(), ack);
        assert!(states.try_recv().is_err());
    }

    #[test]
    fn test_dispatch_without_subscribers() {
        EventBus::new().dispatch(&Event::ConnectionStateChanged(ConnectionState::Connected));
    }
}
