#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use protocol_session::core::codec::ConnectionCodec;
use protocol_session::protocol::packets::{standard_registry, Side};
use protocol_session::ProtocolPhase;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    let registry = match standard_registry(Side::Server) {
        Ok(registry) => registry,
        Err(_) => return,
    };

    // the first byte picks the phase, the rest is the inbound stream
    let (selector, stream) = match data.split_first() {
        Some(split) => split,
        None => return,
    };
    let phase = ProtocolPhase::ALL[*selector as usize % ProtocolPhase::ALL.len()];

    let mut codec = ConnectionCodec::new(registry);
    codec.set_phase(phase);
    let mut src = BytesMut::from(stream);
    while let Ok(Some(_packet)) = codec.decode(&mut src) {}
});
