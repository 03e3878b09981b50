// example/src/main.rs

use demo_app::generated::{evtag_marshal_msg, evtag_unmarshal_msg, Msg};
use tlvgen_runtime::{ByteBuffer, ByteBufferMut, Record, TlvError};

/// Framing tag for the outer record, as a transport would pick it.
const MSG_FRAME: u32 = 0x42;

fn main() -> Result<(), TlvError> {
    let mut msg = Msg::new();
    msg.id_assign(5)?;
    msg.note_assign("two items")?;
    for qty in [1, 2] {
        msg.items_add()?.qty_assign(qty)?;
    }

    // Bare records, one per set field
    let mut out = ByteBufferMut::new();
    msg.marshal(&mut out)?;
    for record in Record::decode_all(out.data())? {
        println!("{:?}", record);
    }

    // The same message wrapped in one outer record
    let mut framed = ByteBufferMut::new();
    evtag_marshal_msg(&mut framed, MSG_FRAME, &msg)?;
    println!("framed: {} bytes", framed.len());

    let mut decoded = Msg::new();
    evtag_unmarshal_msg(&mut ByteBuffer::new(framed.data()), MSG_FRAME, &mut decoded)?;
    println!("id = {:?}, note = {:?}", decoded.id_get(), decoded.note_get());
    for index in 0..decoded.items_len() {
        if let Some(item) = decoded.items_get(index) {
            println!("items[{}].qty = {:?}", index, item.qty_get());
        }
    }

    assert_eq!(decoded, msg);
    Ok(())
}
