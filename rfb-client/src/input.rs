//! Input events and their translation to client messages.
//!
//! Events carry caller-supplied integers as `i64` so that out-of-range values
//! coming from a loosely typed caller can be rejected instead of truncated.
//! [`encode_events`] validates a whole batch before producing any message, so
//! a bad event in the middle of a list means nothing from that list is sent.
//!
//! ```
//! use rfb_client::input::{encode_events, Event};
//!
//! let messages = encode_events(&[Event::key(0xff0d, true), Event::pointer(10, 20, 1)]).unwrap();
//! assert_eq!(messages.len(), 2);
//! assert!(encode_events(&[Event::Pointer { x: -1, y: 0, button_mask: 0 }]).is_err());
//! ```

use crate::errors::RfbClientError;
use rfb_protocol::messages::{ClientMessage, KeyEvent, PointerEvent};
use serde::{Deserialize, Serialize};

/// One input event for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// Press or release of an X11 keysym.
    #[serde(rename = "KeyEvent")]
    Key {
        /// X11 keysym; must fit in 32 bits.
        keysym: i64,
        /// True for press.
        down: bool,
    },
    /// Absolute pointer position and button state.
    #[serde(rename = "PointerEvent")]
    Pointer {
        /// Column; must fit in 16 bits.
        x: i64,
        /// Row; must fit in 16 bits.
        y: i64,
        /// Buttons 1-8 as bits 0-7.
        button_mask: i64,
    },
}

impl Event {
    /// Key event from already-typed values.
    #[must_use]
    pub fn key(keysym: u32, down: bool) -> Self {
        Self::Key {
            keysym: i64::from(keysym),
            down,
        }
    }

    /// Pointer event from already-typed values.
    #[must_use]
    pub fn pointer(x: u16, y: u16, button_mask: u8) -> Self {
        Self::Pointer {
            x: i64::from(x),
            y: i64::from(y),
            button_mask: i64::from(button_mask),
        }
    }

    /// Validate and convert to the wire message.
    pub fn to_message(&self) -> Result<ClientMessage, RfbClientError> {
        match *self {
            Event::Key { keysym, down } => Ok(ClientMessage::KeyEvent(KeyEvent {
                down,
                key: narrow("keysym", keysym)?,
            })),
            Event::Pointer { x, y, button_mask } => Ok(ClientMessage::PointerEvent(PointerEvent {
                button_mask: narrow("button_mask", button_mask)?,
                x: narrow("x", x)?,
                y: narrow("y", y)?,
            })),
        }
    }
}

fn narrow<T: TryFrom<i64>>(field: &str, value: i64) -> Result<T, RfbClientError> {
    T::try_from(value).map_err(|_| {
        RfbClientError::InvalidInput(format!(
            "{} {} is out of range for a {}-bit field",
            field,
            value,
            std::mem::size_of::<T>() * 8
        ))
    })
}

/// Translate events to client messages, preserving order. Fails on the first
/// invalid event without returning any messages.
pub fn encode_events(events: &[Event]) -> Result<Vec<ClientMessage>, RfbClientError> {
    events.iter().map(Event::to_message).collect()
}
