//! Fuzz target for SFTP frame parsing.
//!
//! This fuzzer feeds random input through the frame parser and both
//! message decoders to find:
//! - Panics on truncated or oversized length fields
//! - Decoders reading past the frame payload
//! - Frames that decode but fail to re-encode identically
//!
//! Run with:
//! ```bash
//! cd crates/proto
//! cargo +nightly fuzz run sftp_frame -- -max_total_time=300
//! ```

#![no_main]
use libfuzzer_sys::fuzz_target;
use sftpws_proto::sftp::codec::Frame;
use sftpws_proto::sftp::{Request, Response};

fuzz_target!(|data: &[u8]| {
    let Ok(frame) = Frame::parse(data) else {
        return;
    };

    let mut payload = frame.payload.clone();
    if let Ok(Some(request)) = Request::decode(frame.kind, &mut payload) {
        // Re-encoding must parse back to the same request
        let wire = request.encode(frame.id.unwrap_or(0));
        let mut reparsed = Frame::parse(&wire).expect("Re-encoded request should parse");
        let again = Request::decode(reparsed.kind, &mut reparsed.payload)
            .expect("Re-encoded request should decode");
        assert_eq!(again, Some(request));
    }

    let mut payload = frame.payload.clone();
    let _ = Response::decode(frame.kind, &mut payload);
});
