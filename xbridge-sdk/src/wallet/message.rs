//! Message and out-action encoders.

use std::sync::Arc;

use crate::address::Address;
use crate::cell::{Cell, CellBuilder};
use crate::error::BridgeResult;
use crate::model::OutboundMessage;

/// `action_send_msg` tag.
pub const OP_ACTION_SEND_MSG: u32 = 0x0ec3c86d;

/// Pay forwarding fees separately and ignore action errors.
pub const DEFAULT_SEND_MODE: u8 = 3;

/// `MessageRelaxed` for an internal message sent by a wallet.
pub fn internal_message(msg: &OutboundMessage) -> BridgeResult<Cell> {
    let mut b = CellBuilder::new();
    b.store_bit(false)? // int_msg_info$0
        .store_bit(true)? // ihr_disabled
        .store_bit(msg.bounce())?
        .store_bit(false)? // bounced
        .store_address(None)? // src, filled in by the wallet
        .store_address(Some(msg.to()))?
        .store_coins(msg.value())?
        .store_bit(false)? // no extra currencies
        .store_coins(0)? // ihr_fee
        .store_coins(0)? // fwd_fee
        .store_uint(0, 64)? // created_lt
        .store_uint(0, 32)? // created_at
        .store_bit(false)?; // no state init
    store_body(&mut b, msg.payload())?;
    b.build()
}

/// External inbound message carrying a signed wallet body.
pub fn external_message(dest: &Address, body: Cell) -> BridgeResult<Cell> {
    let mut b = CellBuilder::new();
    b.store_uint(0b10, 2)? // ext_in_msg_info$10
        .store_address(None)?
        .store_address(Some(dest))?
        .store_coins(0)? // import_fee
        .store_bit(false)? // no state init
        .store_bit(true)?
        .store_ref(Arc::new(body))?;
    b.build()
}

/// Out-action list sending every message with `mode`.
pub fn out_action_list(messages: &[OutboundMessage], mode: u8) -> BridgeResult<Cell> {
    let mut list = Cell::empty();
    for msg in messages {
        let mut b = CellBuilder::new();
        b.store_ref(Arc::new(list))?
            .store_uint(OP_ACTION_SEND_MSG as u64, 32)?
            .store_uint(mode as u64, 8)?
            .store_ref(Arc::new(internal_message(msg)?))?;
        list = b.build()?;
    }
    Ok(list)
}

fn store_body(b: &mut CellBuilder, payload: &Arc<Cell>) -> BridgeResult<()> {
    if payload.is_empty() {
        b.store_bit(false)?;
    } else {
        b.store_bit(true)?.store_ref(payload.clone())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(value: u128) -> OutboundMessage {
        OutboundMessage::transfer(Address::new(0, [5; 32]), value)
    }

    #[test]
    fn test_internal_message_layout() {
        let cell = internal_message(&msg(1_000)).unwrap();
        let mut s = cell.parse();
        assert!(!s.load_bit().unwrap());
        assert!(s.load_bit().unwrap()); // ihr_disabled
        assert!(s.load_bit().unwrap()); // bounce
        assert!(!s.load_bit().unwrap());
        assert!(s.load_address().unwrap().is_none());
        assert_eq!(s.load_address().unwrap(), Some(Address::new(0, [5; 32])));
        assert_eq!(s.load_coins().unwrap(), 1_000);
        assert_eq!(cell.refs().len(), 0);
    }

    #[test]
    fn test_out_action_list_depth_grows_per_message() {
        let messages: Vec<_> = (1..=3).map(|v| msg(v)).collect();
        let list = out_action_list(&messages, DEFAULT_SEND_MODE).unwrap();
        assert_eq!(list.depth(), 3);

        let mut s = list.parse();
        let _prev = s.load_ref().unwrap();
        assert_eq!(s.load_uint(32).unwrap(), OP_ACTION_SEND_MSG as u64);
        assert_eq!(s.load_uint(8).unwrap(), 3);
    }

    #[test]
    fn test_external_message_wraps_body() {
        let ext = external_message(&Address::new(0, [1; 32]), Cell::empty()).unwrap();
        assert_eq!(ext.refs().len(), 1);
        assert_eq!(ext.bit_len(), 2 + 2 + 267 + 4 + 1 + 1);
    }
}
