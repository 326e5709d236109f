use bytes::BytesMut;
use nx::ws::{Context, FrameType, Opcode, Outbox, decode_frame, encode_frame};
use proptest::prelude::*;

fn header_len(size: usize) -> usize {
    match size {
        0..=125 => 2,
        126..=65535 => 4,
        _ => 10,
    }
}

#[test]
fn test_context_sends_one_frame_per_message() {
    let (outbox, mut rx) = Outbox::channel();
    let mut ctx = Context::new(outbox);

    ctx.push("a").push("b");
    assert!(ctx.done());
    assert!(ctx.pending().is_empty());

    ctx.frame_type(FrameType::Binary).push([1u8, 2, 3]);
    assert!(ctx.done());

    let text = rx.try_recv().unwrap();
    assert_eq!(&text[..], &[0x81, 2, b'a', b'b']);

    let binary = rx.try_recv().unwrap();
    assert_eq!(&binary[..], &[0x82, 3, 1, 2, 3]);
}

#[test]
fn test_context_reports_closed_connection() {
    let (outbox, rx) = Outbox::channel();
    drop(rx);

    let mut ctx = Context::new(outbox);
    assert!(!ctx.send_text("lost"));
}

fn payloads() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![0usize..300, 65500usize..65600, 65536usize..70000]
        .prop_flat_map(|size| prop::collection::vec(any::<u8>(), size))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn frame_uses_smallest_length_form(payload in payloads()) {
        let size = payload.len();
        let mut buf = BytesMut::new();
        encode_frame(&mut buf, Opcode::Binary, &payload);

        prop_assert_eq!(buf.len(), header_len(size) + size);
        prop_assert_eq!(buf[0], 0x82);

        let (frame, used) = decode_frame(&buf).unwrap().unwrap();
        prop_assert_eq!(used, buf.len());
        prop_assert!(frame.fin);
        prop_assert_eq!(frame.payload, payload);
    }

    #[test]
    fn truncated_frame_needs_more(size in 0usize..200, cut in 1usize..10) {
        let payload = vec![1u8; size];
        let mut buf = BytesMut::new();
        encode_frame(&mut buf, Opcode::Text, &payload);

        let keep = buf.len().saturating_sub(cut);
        prop_assert!(decode_frame(&buf[..keep]).unwrap().is_none());
    }
}
