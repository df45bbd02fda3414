//! Typestate states for message transactions

use crate::{Gid, MsgObserver, TransDescriptor, TracingObserver};
use std::sync::Arc;

pub mod markers {
    pub trait MsgState: Send + 'static {}
    pub trait TerminalState: MsgState {}
}

// State types
pub struct Built;
pub struct Prepared {
    pub prepared_at_millis: u64,
}
pub struct Submitted {
    pub prepared_at_millis: u64,
    pub submitted_at_millis: u64,
}
pub struct Aborted {
    pub prepared_at_millis: u64,
    pub aborted_at_millis: u64,
}

impl markers::MsgState for Built {}
impl markers::MsgState for Prepared {}
impl markers::MsgState for Submitted {}
impl markers::MsgState for Aborted {}

impl markers::TerminalState for Submitted {}
impl markers::TerminalState for Aborted {}

/// A reliable message transaction in state `S`.
///
/// Transitions consume the message, so a state can never be entered twice and
/// steps can only be added before `prepare`.
pub struct Msg<S: markers::MsgState> {
    pub(crate) descriptor: TransDescriptor,
    pub(crate) observer: Arc<dyn MsgObserver>,
    pub state: S,
}

impl<S: markers::MsgState> Msg<S> {
    /// Descriptor sent to the coordinator
    pub fn descriptor(&self) -> &TransDescriptor {
        &self.descriptor
    }

    /// Transaction id
    pub fn gid(&self) -> &Gid {
        &self.descriptor.gid
    }

    pub(crate) fn transition<T: markers::MsgState>(self, state: T) -> Msg<T> {
        Msg {
            descriptor: self.descriptor,
            observer: self.observer,
            state,
        }
    }
}

impl Msg<Built> {
    pub(crate) fn from_descriptor(descriptor: TransDescriptor) -> Self {
        Self {
            descriptor,
            observer: Arc::new(TracingObserver),
            state: Built,
        }
    }
}

/// Stage a message run ended in, without the typestate
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MsgStage {
    /// Prepare was never accepted
    Built,
    /// Prepared, neither submitted nor aborted yet
    Prepared,
    /// Submitted
    Submitted,
    /// Aborted
    Aborted,
}

impl MsgStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Submitted | Self::Aborted)
    }
}

impl std::fmt::Display for MsgStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Built => "built",
            Self::Prepared => "prepared",
            Self::Submitted => "submitted",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}
