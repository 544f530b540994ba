//! Packing properties over random message sets.

use std::sync::Arc;

use proptest::prelude::*;
use xbridge_sdk::cell::boc;
use xbridge_sdk::wallet::{out_action_list, DEFAULT_SEND_MODE};
use xbridge_sdk::{pack_messages, Address, BridgeError, CellBuilder, OutboundMessage, PackingLimits};

fn message(index: usize, payload_len: usize) -> OutboundMessage {
    let mut body = CellBuilder::new();
    body.store_bytes(&vec![(index % 256) as u8; payload_len]).unwrap();
    OutboundMessage::new(
        Address::new(0, [(index % 256) as u8; 32]),
        index as u128,
        Arc::new(body.build().unwrap()),
    )
}

fn encoded_size(messages: &[OutboundMessage]) -> usize {
    boc::serialize(&out_action_list(messages, DEFAULT_SEND_MODE).unwrap())
        .unwrap()
        .len()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_groups_cover_input_in_order_and_are_maximal(
        payloads in prop::collection::vec(0usize..=120, 1..40),
        max_messages in 1usize..12,
        max_boc_bytes in 200usize..2_000,
    ) {
        let messages: Vec<_> = payloads.iter().enumerate().map(|(i, n)| message(i, *n)).collect();
        let limits =
            PackingLimits::with_max_messages(max_messages).with_max_boc_bytes(max_boc_bytes);

        match pack_messages(&messages, &limits, |slice| out_action_list(slice, DEFAULT_SEND_MODE)) {
            Ok(groups) => {
                let mut cursor = 0;
                for group in &groups {
                    prop_assert_eq!(group.range.start, cursor);
                    prop_assert!(!group.messages.is_empty());
                    prop_assert!(group.messages.len() <= max_messages);
                    prop_assert!(group.boc_bytes <= max_boc_bytes);
                    prop_assert_eq!(group.boc_bytes, encoded_size(&messages[group.range.clone()]));
                    for (offset, m) in group.messages.iter().enumerate() {
                        prop_assert_eq!(m.value(), (cursor + offset) as u128);
                    }
                    cursor = group.range.end;

                    // One more message would break a ceiling.
                    if group.range.end < messages.len() {
                        let extended = &messages[group.range.start..group.range.end + 1];
                        prop_assert!(
                            extended.len() > max_messages || encoded_size(extended) > max_boc_bytes
                        );
                    }
                }
                prop_assert_eq!(cursor, messages.len());
            }
            Err(BridgeError::MessageTooLarge { index, .. }) => {
                prop_assert!(encoded_size(&messages[index..index + 1]) > max_boc_bytes);
            }
            Err(other) => prop_assert!(false, "unexpected error {}", other),
        }
    }
}
