use crate::types::{Key, KeyValue};

const NULL_CODE: u8 = 0x00;
const STRING_CODE: u8 = 0x02;
const INT_ZERO_CODE: u8 = 0x14;
const FALSE_CODE: u8 = 0x26;
const TRUE_CODE: u8 = 0x27;
const ESCAPE: u8 = 0xff;

/// Packs `key` into ordered tuple bytes.
///
/// Strings are terminated by `0x00` and embedded `0x00` bytes are escaped as
/// `0x00 0xff`, which keeps every component self-delimiting.
pub fn pack(key: &Key) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() * 9);
    for value in key.values() {
        pack_value(value, &mut out);
    }

    out
}

fn pack_value(value: &KeyValue, out: &mut Vec<u8>) {
    match value {
        KeyValue::Null => out.push(NULL_CODE),
        KeyValue::Bool(false) => out.push(FALSE_CODE),
        KeyValue::Bool(true) => out.push(TRUE_CODE),
        KeyValue::Integer(i) => pack_integer(*i, out),
        KeyValue::String(s) => {
            out.push(STRING_CODE);
            for byte in s.as_bytes() {
                out.push(*byte);
                if *byte == NULL_CODE {
                    out.push(ESCAPE);
                }
            }
            out.push(NULL_CODE);
        }
    }
}

/// Integers use `0x14 ± n` where `n` is the number of big-endian magnitude bytes.
/// Negative magnitudes are stored one's-complemented so byte order matches
/// numeric order.
fn pack_integer(value: i64, out: &mut Vec<u8>) {
    if value == 0 {
        out.push(INT_ZERO_CODE);
        return;
    }

    let magnitude = value.unsigned_abs();
    let len = (8 - magnitude.leading_zeros() as usize / 8) as u8;
    let bytes = if value > 0 {
        magnitude.to_be_bytes()
    } else {
        (!magnitude).to_be_bytes()
    };

    if value > 0 {
        out.push(INT_ZERO_CODE + len);
    } else {
        out.push(INT_ZERO_CODE - len);
    }
    out.extend_from_slice(&bytes[8 - len as usize..]);
}
