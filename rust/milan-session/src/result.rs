//! Transport representation of a call outcome.

use milan_codec::{Decode, Decoder, Encode, Encoder, WireOrder};
use milan_wire::{Error, Result};

/// Either a return value or a serialized error, as carried by a
/// RESPONSE body: `optional<value> ‖ bool has_error ‖
/// opt(error_class_name, message)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultHolder<T> {
    value: Option<T>,
    error: Option<(String, String)>,
}

impl<T> ResultHolder<T> {
    pub fn from_value(value: T) -> Self {
        ResultHolder {
            value: Some(value),
            error: None,
        }
    }

    pub fn from_error(error: &Error) -> Self {
        ResultHolder {
            value: None,
            error: Some((
                error.kind().wire_name().to_string(),
                error.message().to_string(),
            )),
        }
    }

    pub fn from_result(result: Result<T>) -> Self {
        match result {
            Ok(value) => ResultHolder::from_value(value),
            Err(e) => ResultHolder::from_error(&e),
        }
    }

    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// Unpack: the error wins when both sides are somehow present, an
    /// empty holder is an `invalid_state`.
    pub fn into_result(self) -> Result<T> {
        if let Some((class_name, message)) = self.error {
            return Err(Error::from_wire(&class_name, &message));
        }
        match self.value {
            Some(value) => Ok(value),
            None => Err(Error::invalid_state("empty result holder accessed")),
        }
    }
}

impl<T: Encode> Encode for ResultHolder<T> {
    fn encode<O: WireOrder>(&self, enc: &mut Encoder<'_, O>) -> Result<()> {
        self.value.encode(enc)?;
        match &self.error {
            Some((class_name, message)) => {
                enc.put_bool(true);
                class_name.encode(enc)?;
                message.encode(enc)
            }
            None => {
                enc.put_bool(false);
                Ok(())
            }
        }
    }
}

impl<T: Decode> Decode for ResultHolder<T> {
    fn decode<O: WireOrder>(dec: &mut Decoder<'_, O>) -> Result<Self> {
        let value: Option<T> = Decode::decode(dec)?;
        let error = if dec.get_bool()? {
            let class_name: String = dec.decode()?;
            let message: String = dec.decode()?;
            Some((class_name, message))
        } else {
            None
        };
        Ok(ResultHolder { value, error })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use milan_codec::{LittleEndian, decode_one, encode_one};
    use milan_wire::ErrorKind;

    #[test]
    fn value_roundtrip() {
        let holder = ResultHolder::from_value("patata_poo".to_string());
        let bytes = encode_one::<LittleEndian, _>(&holder).unwrap();
        let back: ResultHolder<String> = decode_one::<LittleEndian, _>(&bytes).unwrap();
        assert_eq!(back.into_result().unwrap(), "patata_poo");
    }

    #[test]
    fn void_value_roundtrip() {
        let holder = ResultHolder::from_value(());
        let bytes = encode_one::<LittleEndian, _>(&holder).unwrap();
        // presence byte, has_error byte.
        assert_eq!(bytes, [0x01, 0x00]);
        let back: ResultHolder<()> = decode_one::<LittleEndian, _>(&bytes).unwrap();
        back.into_result().unwrap();
    }

    #[test]
    fn error_roundtrip() {
        let holder: ResultHolder<u32> =
            ResultHolder::from_error(&Error::not_found("no such key"));
        let bytes = encode_one::<LittleEndian, _>(&holder).unwrap();
        let back: ResultHolder<u32> = decode_one::<LittleEndian, _>(&bytes).unwrap();
        let err = back.into_result().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.message(), "no such key");
    }

    #[test]
    fn unknown_error_class_degrades_to_unknown() {
        let holder = ResultHolder::<u32> {
            value: None,
            error: Some(("future_error".into(), "whoosh".into())),
        };
        let bytes = encode_one::<LittleEndian, _>(&holder).unwrap();
        let back: ResultHolder<u32> = decode_one::<LittleEndian, _>(&bytes).unwrap();
        let err = back.into_result().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert!(err.message().contains("future_error"));
    }

    #[test]
    fn empty_holder_is_invalid_state() {
        let holder = ResultHolder::<u32> {
            value: None,
            error: None,
        };
        assert_eq!(
            holder.into_result().unwrap_err().kind(),
            ErrorKind::InvalidState
        );
    }
}
