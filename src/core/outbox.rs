//! Transport-agnostic delivery instructions
//!
//! Room and relay operations never touch sockets; they return an `Outbox`
//! which the server flushes against the session table.

use crate::core::message_types::ServerEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Send one event to one connection
    Event { to: String, event: ServerEvent },
    /// Close the connection after everything queued before it
    Terminate { to: String },
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Outbox {
    deliveries: Vec<Delivery>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(&mut self, to: impl Into<String>, event: ServerEvent) {
        self.deliveries.push(Delivery::Event {
            to: to.into(),
            event,
        });
    }

    /// Queue `event` for every recipient, in the given order
    pub fn broadcast<I, S>(&mut self, recipients: I, event: &ServerEvent)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for to in recipients {
            self.send(to, event.clone());
        }
    }

    pub fn terminate(&mut self, to: impl Into<String>) {
        self.deliveries.push(Delivery::Terminate { to: to.into() });
    }

    /// Events queued for a single connection, in order
    #[cfg(test)]
    pub fn events_for(&self, connection_id: &str) -> Vec<&ServerEvent> {
        self.deliveries
            .iter()
            .filter_map(|delivery| match delivery {
                Delivery::Event { to, event } if to == connection_id => Some(event),
                _ => None,
            })
            .collect()
    }

    #[cfg(test)]
    pub fn terminates(&self, connection_id: &str) -> bool {
        self.deliveries
            .iter()
            .any(|delivery| matches!(delivery, Delivery::Terminate { to } if to == connection_id))
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty()
    }
}

impl IntoIterator for Outbox {
    type Item = Delivery;
    type IntoIter = std::vec::IntoIter<Delivery>;

    fn into_iter(self) -> Self::IntoIter {
        self.deliveries.into_iter()
    }
}
