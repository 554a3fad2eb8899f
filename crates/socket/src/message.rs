use piggyback_envelope::SenderId;

/// A received value with its provenance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message<T> {
    /// Decoded value.
    pub value: T,
    /// Producer that sent it.
    pub sender: SenderId,
    /// Position in the producer's stream.
    pub sequence: u64,
    /// Topic, for messages received on a SUB socket.
    pub topic: Option<String>,
}

impl<T> Message<T> {
    /// Discard provenance.
    pub fn into_value(self) -> T {
        self.value
    }
}
