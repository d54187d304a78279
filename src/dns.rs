//! DNS message helpers built on top of `hickory-proto`.

use hickory_proto::op::{Message, MessageType, OpCode, ResponseCode};

/// Length of the fixed DNS header.
pub const HEADER_LEN: usize = 12;

/// Transaction ID of a raw message, if it is long enough to carry a header.
pub fn header_id(data: &[u8]) -> Option<u16> {
    if data.len() < HEADER_LEN {
        return None;
    }
    Some(u16::from_be_bytes([data[0], data[1]]))
}

/// First question of a message formatted for logs.
pub fn question_name(message: &Message) -> String {
    message
        .queries()
        .first()
        .map(|q| format!("{} {}", q.name(), q.query_type()))
        .unwrap_or_else(|| "<none>".to_string())
}

/// Build an error reply for `query` carrying its ID, opcode, RD flag and
/// question section.
pub fn error_response(query: &Message, code: ResponseCode) -> Message {
    let mut response = Message::new();
    response
        .set_id(query.id())
        .set_message_type(MessageType::Response)
        .set_op_code(query.op_code())
        .set_recursion_desired(query.recursion_desired())
        .set_recursion_available(true)
        .set_response_code(code)
        .add_queries(query.queries().to_vec());
    response
}

/// SERVFAIL reply for a query no upstream could answer.
pub fn server_failure(query: &Message) -> Message {
    error_response(query, ResponseCode::ServFail)
}

/// FORMERR reply for a packet whose header was readable but whose body was
/// not.
pub fn format_error(id: u16) -> Message {
    let mut response = Message::new();
    response
        .set_id(id)
        .set_message_type(MessageType::Response)
        .set_op_code(OpCode::Query)
        .set_response_code(ResponseCode::FormErr);
    response
}
