use gsl_transport::Envelope;

use crate::error::GprResult;
use crate::policy::SubmitPolicy;

pub struct Encoded {
    pub policy: SubmitPolicy,
    pub envelope: Envelope,
    pub payload: Vec<u8>,
}

impl Encoded {
    pub fn new(policy: SubmitPolicy, envelope: Envelope, payload: Vec<u8>) -> Self {
        Self {
            policy,
            envelope,
            payload,
        }
    }
}

/// Translates between typed commands/replies and the wire bytes carried over
/// a [`crate::port::SharedPort`].
pub trait Codec: Clone + Send + Sync + 'static {
    type Cmd: Send + 'static;
    type Rep: Send + 'static;

    fn encode_cmd(&self, cmd: &Self::Cmd) -> GprResult<Encoded>;
    fn decode_cmd(&self, envelope: Envelope, payload: &[u8]) -> GprResult<Self::Cmd>;
    fn encode_rep(&self, rep: &Self::Rep) -> GprResult<Encoded>;
    fn decode_rep(&self, envelope: Envelope, payload: &[u8]) -> GprResult<Self::Rep>;
}
