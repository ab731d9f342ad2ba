use anyhow::{anyhow, Result};
use hickory_proto::op::{Edns, Message, MessageType, Query, ResponseCode};
use hickory_proto::rr::Name;

use crate::script::QueryRecord;

/// EDNS0 advertised UDP payload size.
const EDNS_UDP_PAYLOAD: u16 = 4096;

/// Response fields the dispatcher correlates and classifies on.
#[derive(Debug)]
pub struct ParsedResponse {
	pub xid: u16,
	pub rcode: ResponseCode,
}

/// Build a wire-format DNS query for the given record.
///
/// The caller supplies the transaction ID so it can guarantee uniqueness
/// against its own outstanding queries before anything hits the wire.
pub fn build_query(record: &QueryRecord, xid: u16, edns: bool, dnssec_ok: bool) -> Result<Vec<u8>> {
	let name = Name::from_ascii(&record.owner)
		.map_err(|e| anyhow!("invalid owner name '{}': {}", record.owner, e))?;

	let mut message = Message::new();
	message.set_id(xid);
	message.set_recursion_desired(true);
	let mut query = Query::query(name, record.qtype);
	query.set_query_class(record.qclass);
	message.add_query(query);

	// The DO bit rides in the OPT record, so requesting it keeps EDNS on
	// even when EDNS itself was switched off.
	if edns || dnssec_ok {
		let mut opt = Edns::new();
		opt.set_max_payload(EDNS_UDP_PAYLOAD);
		opt.set_version(0);
		opt.set_dnssec_ok(dnssec_ok);
		message.set_edns(opt);
	}

	message
		.to_vec()
		.map_err(|e| anyhow!("failed to serialize DNS query: {}", e))
}

/// Parse a DNS response far enough to correlate and classify it.
///
/// Returns an error for anything that is not a parseable response message;
/// the dispatcher drops those silently.
pub fn parse_response(bytes: &[u8]) -> Result<ParsedResponse> {
	let message = Message::from_vec(bytes)
		.map_err(|e| anyhow!("failed to parse DNS response: {}", e))?;

	if message.message_type() != MessageType::Response {
		return Err(anyhow!("received a query instead of a response"));
	}

	Ok(ParsedResponse {
		xid: message.id(),
		rcode: message.response_code(),
	})
}

/// Success/failure classification: NOERROR and NXDOMAIN both mean the
/// server answered properly, every other rcode is a failure.
pub fn is_success(rcode: ResponseCode) -> bool {
	matches!(rcode, ResponseCode::NoError | ResponseCode::NXDomain)
}
