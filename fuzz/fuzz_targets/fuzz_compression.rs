#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use protocol_session::utils::compression::{CompressionKind, CompressionStage};

const LIMIT: usize = 1 << 20;

fuzz_target!(|data: &[u8]| {
    if data.len() > LIMIT {
        return;
    }
    for kind in [CompressionKind::Zlib, CompressionKind::Lz4, CompressionKind::Zstd] {
        let stage = CompressionStage::new(64, kind, 3).with_max_uncompressed_size(LIMIT);

        // arbitrary input as a received frame body
        let _ = stage.decode(BytesMut::from(data));

        // arbitrary input as an outgoing body must survive the roundtrip
        if let Ok((wrapped, _)) = stage.encode(BytesMut::from(data)) {
            let restored = stage.decode(wrapped).expect("own output must decode");
            assert_eq!(&restored[..], data);
        }
    }
});
