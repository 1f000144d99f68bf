//! Wire codec for the device protocol.
//!
//! Upload (host → device): `<prefix><v1>+<v2>+...+<vn>`, ASCII.
//!
//! Events (device → host): one per line, `code,timestamp[,payload]`, ASCII integers.
//! Anything else on the line is diagnostic text.

use super::parameters::ParameterSet;

/// Delimiter between uploaded parameter values.
pub const UPLOAD_DELIMITER: char = '+';

/// Delimiter between fields of an event line.
pub const FIELD_DELIMITER: char = ',';

/// One decoded device event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    /// Event code.
    pub code: i64,
    /// Device clock in milliseconds.
    pub timestamp: i64,
    /// Optional payload (first field after the timestamp).
    pub payload: Option<i64>,
}

impl Event {
    /// Create an event.
    pub fn new(code: i64, timestamp: i64, payload: Option<i64>) -> Self {
        Self {
            code,
            timestamp,
            payload,
        }
    }

    /// Payload, or zero when the device sent none.
    pub fn payload_or_zero(&self) -> i64 {
        self.payload.unwrap_or(0)
    }
}

/// Result of decoding one line of device output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedLine {
    /// A well-formed event.
    Event(Event),
    /// Diagnostic text; never enqueued.
    RawText(String),
}

/// Encode the parameter upload message.
///
/// Values are written in the set's insertion order.
pub fn encode_upload(prefix: u8, params: &ParameterSet) -> Vec<u8> {
    let body = params
        .values()
        .map(|value| value.to_string())
        .collect::<Vec<_>>()
        .join(&UPLOAD_DELIMITER.to_string());

    let mut message = Vec::with_capacity(body.len() + 1);
    message.push(prefix);
    message.extend_from_slice(body.as_bytes());
    message
}

/// Decode one line of device output.
///
/// A line is an event only if it has at least two fields and every field parses as
/// an integer. Fields past the payload are ignored.
pub fn decode_line(line: &str) -> DecodedLine {
    let text = line.trim_end_matches(['\r', '\n']);

    let fields: Result<Vec<i64>, _> = text
        .split(FIELD_DELIMITER)
        .map(|field| field.trim().parse::<i64>())
        .collect();

    match fields {
        Ok(fields) if fields.len() >= 2 => DecodedLine::Event(Event {
            code: fields[0],
            timestamp: fields[1],
            payload: fields.get(2).copied(),
        }),
        _ => DecodedLine::RawText(text.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_prefix_and_values_in_order() {
        let params: ParameterSet = [("a", 1), ("b", 2), ("c", 3)].into_iter().collect();
        assert_eq!(encode_upload(b'D', &params), b"D1+2+3".to_vec());
    }

    #[test]
    fn encode_order_follows_insertion_not_names() {
        let params: ParameterSet = [("zeta", 30), ("alpha", -4), ("mid", 0), ("beta", 12)]
            .into_iter()
            .collect();
        let message = encode_upload(b'D', &params);
        let body = std::str::from_utf8(&message[1..]).unwrap();
        let values: Vec<i64> = body
            .split(UPLOAD_DELIMITER)
            .map(|v| v.parse().unwrap())
            .collect();
        assert_eq!(values, params.values().collect::<Vec<_>>());
    }

    #[test]
    fn empty_parameter_set_is_just_the_prefix() {
        assert_eq!(encode_upload(b'D', &ParameterSet::new()), b"D".to_vec());
    }

    #[test]
    fn decodes_event_with_payload() {
        assert_eq!(
            decode_line("5,1234,1"),
            DecodedLine::Event(Event::new(5, 1234, Some(1)))
        );
    }

    #[test]
    fn decodes_event_without_payload_and_line_endings() {
        assert_eq!(
            decode_line("0,98765\r\n"),
            DecodedLine::Event(Event::new(0, 98765, None))
        );
    }

    #[test]
    fn tolerates_whitespace_around_fields() {
        assert_eq!(
            decode_line(" 2, 100 , -3 \n"),
            DecodedLine::Event(Event::new(2, 100, Some(-3)))
        );
    }

    #[test]
    fn extra_fields_after_payload_are_ignored() {
        assert_eq!(
            decode_line("7,10,3,99"),
            DecodedLine::Event(Event::new(7, 10, Some(3)))
        );
    }

    #[test]
    fn text_is_raw() {
        assert_eq!(
            decode_line("hello world"),
            DecodedLine::RawText("hello world".to_string())
        );
    }

    #[test]
    fn partially_numeric_lines_are_raw() {
        for line in ["5,abc", "5,12,x", "1.5,2", "", "\r\n", "42", ",,", "3,"] {
            assert!(
                matches!(decode_line(line), DecodedLine::RawText(_)),
                "{line:?} should be raw text"
            );
        }
    }

    #[test]
    fn overflowing_integers_are_raw() {
        assert!(matches!(
            decode_line("1,99999999999999999999999"),
            DecodedLine::RawText(_)
        ));
    }
}
