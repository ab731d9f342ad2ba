use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::str::FromStr;

use anyhow::{anyhow, bail, Result};
use hickory_proto::rr::{DNSClass, RecordType};

use crate::config::ScriptInput;

/// A single query to send: owner name, type, and class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRecord {
	pub owner: String,
	pub qtype: RecordType,
	pub qclass: DNSClass,
}

/// Parse one script line into a record.
///
/// Lines look like `<owner_name> [<qtype>] [<qclass>]`. Blank lines and
/// lines starting with ';' are comments and yield None. The query type
/// defaults to A, the class to `default_class`.
pub fn parse_record(line: &str, default_class: DNSClass) -> Result<Option<QueryRecord>> {
	let trimmed = line.trim();
	if trimmed.is_empty() || trimmed.starts_with(';') {
		return Ok(None);
	}
	let mut fields = trimmed.split_whitespace();
	let owner = match fields.next() {
		Some(field) => field.to_string(),
		None => return Ok(None),
	};
	let qtype = match fields.next() {
		Some(text) => RecordType::from_str(&text.to_ascii_uppercase())
			.map_err(|_| anyhow!("unrecognized query type '{}' in '{}'", text, trimmed))?,
		None => RecordType::A,
	};
	let qclass = match fields.next() {
		Some(text) => DNSClass::from_str(&text.to_ascii_uppercase())
			.map_err(|_| anyhow!("unrecognized query class '{}' in '{}'", text, trimmed))?,
		None => default_class,
	};
	if let Some(extra) = fields.next() {
		bail!("unexpected field '{}' in '{}'", extra, trimmed);
	}
	Ok(Some(QueryRecord {
		owner,
		qtype,
		qclass,
	}))
}

/// Raw line supply that cycles over its input.
///
/// `next_line` returns None once per full pass over the input; the call
/// after that starts again from the beginning. Files rewind with a seek.
/// Stdin cannot rewind, so its lines are kept as they are first read and
/// replayed from memory once stdin runs dry.
enum Feed {
	File { reader: BufReader<File> },
	Stdin { replay: Vec<String>, pos: usize, eof: bool },
	Inline { lines: Vec<String>, pos: usize },
}

impl Feed {
	fn open(input: &ScriptInput) -> Result<Feed> {
		match input {
			ScriptInput::File(path) => {
				let file = File::open(path).map_err(|e| {
					anyhow!("failed to open query script '{}': {}", path.display(), e)
				})?;
				Ok(Feed::File {
					reader: BufReader::new(file),
				})
			}
			ScriptInput::Stdin => Ok(Feed::Stdin {
				replay: Vec::new(),
				pos: 0,
				eof: false,
			}),
			ScriptInput::Inline(text) => Ok(Feed::Inline {
				lines: text.lines().map(str::to_string).collect(),
				pos: 0,
			}),
		}
	}

	fn next_line(&mut self) -> Result<Option<String>> {
		match self {
			Feed::File { reader } => {
				let mut line = String::new();
				let read = reader
					.read_line(&mut line)
					.map_err(|e| anyhow!("failed to read query script: {}", e))?;
				if read == 0 {
					reader
						.seek(SeekFrom::Start(0))
						.map_err(|e| anyhow!("failed to rewind query script: {}", e))?;
					Ok(None)
				} else {
					Ok(Some(line))
				}
			}
			Feed::Stdin { replay, pos, eof } => {
				if !*eof {
					let mut line = String::new();
					let read = std::io::stdin()
						.read_line(&mut line)
						.map_err(|e| anyhow!("failed to read query script: {}", e))?;
					if read > 0 {
						replay.push(line.clone());
						return Ok(Some(line));
					}
					*eof = true;
					*pos = 0;
					return Ok(None);
				}
				if *pos >= replay.len() {
					*pos = 0;
					return Ok(None);
				}
				let line = replay[*pos].clone();
				*pos += 1;
				Ok(Some(line))
			}
			Feed::Inline { lines, pos } => {
				if *pos >= lines.len() {
					*pos = 0;
					return Ok(None);
				}
				let line = lines[*pos].clone();
				*pos += 1;
				Ok(Some(line))
			}
		}
	}
}

/// Infinite supply of query records, cycling over the script.
///
/// Streaming mode parses lazily, one line per call. Preloaded mode parses
/// the whole script once at construction and walks the records modulo
/// their count; both modes yield the same sequence for the same input.
pub struct QuerySource {
	kind: SourceKind,
}

enum SourceKind {
	Streaming {
		feed: Feed,
		default_class: DNSClass,
		produced_this_pass: bool,
	},
	Preloaded {
		records: Vec<QueryRecord>,
		next: usize,
	},
}

impl QuerySource {
	pub fn open(input: &ScriptInput, default_class: DNSClass, preload: bool) -> Result<QuerySource> {
		let mut feed = Feed::open(input)?;
		let kind = if preload {
			let mut records = Vec::new();
			while let Some(line) = feed.next_line()? {
				if let Some(record) = parse_record(&line, default_class)? {
					records.push(record);
				}
			}
			if records.is_empty() {
				bail!("query input contains no records");
			}
			SourceKind::Preloaded { records, next: 0 }
		} else {
			SourceKind::Streaming {
				feed,
				default_class,
				produced_this_pass: false,
			}
		};
		Ok(QuerySource { kind })
	}

	/// Next record, restarting from the top of the script on exhaustion.
	///
	/// A malformed record is a hard error; an input without any records at
	/// all is too, so an all-comment script cannot spin the caller.
	pub fn next(&mut self) -> Result<QueryRecord> {
		match &mut self.kind {
			SourceKind::Preloaded { records, next } => {
				let record = records[*next].clone();
				*next = (*next + 1) % records.len();
				Ok(record)
			}
			SourceKind::Streaming {
				feed,
				default_class,
				produced_this_pass,
			} => loop {
				match feed.next_line()? {
					Some(line) => {
						if let Some(record) = parse_record(&line, *default_class)? {
							*produced_this_pass = true;
							return Ok(record);
						}
					}
					None => {
						if !*produced_this_pass {
							bail!("query input contains no records");
						}
						*produced_this_pass = false;
					}
				}
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	const SCRIPT: &str = "\
; sample script
example.com
www.example.com AAAA

ch.example.com TXT CH
";

	fn record(owner: &str, qtype: RecordType, qclass: DNSClass) -> QueryRecord {
		QueryRecord {
			owner: owner.to_string(),
			qtype,
			qclass,
		}
	}

	#[test]
	fn test_parse_defaults() {
		let parsed = parse_record("example.com", DNSClass::IN).unwrap().unwrap();
		assert_eq!(parsed, record("example.com", RecordType::A, DNSClass::IN));
	}

	#[test]
	fn test_parse_explicit_type_and_class() {
		let parsed = parse_record("  host.test  mx  ch ", DNSClass::IN)
			.unwrap()
			.unwrap();
		assert_eq!(parsed, record("host.test", RecordType::MX, DNSClass::CH));
	}

	#[test]
	fn test_parse_default_class_flows_through() {
		let parsed = parse_record("host.test NS", DNSClass::CH).unwrap().unwrap();
		assert_eq!(parsed.qclass, DNSClass::CH);
	}

	#[test]
	fn test_comments_and_blanks_skipped() {
		assert!(parse_record("", DNSClass::IN).unwrap().is_none());
		assert!(parse_record("   ", DNSClass::IN).unwrap().is_none());
		assert!(parse_record("; a comment", DNSClass::IN).unwrap().is_none());
	}

	#[test]
	fn test_bad_type_is_an_error() {
		assert!(parse_record("host.test BOGUS", DNSClass::IN).is_err());
	}

	#[test]
	fn test_trailing_field_is_an_error() {
		assert!(parse_record("host.test A IN extra", DNSClass::IN).is_err());
	}

	#[test]
	fn test_streaming_cycles() {
		let input = ScriptInput::Inline(SCRIPT.to_string());
		let mut source = QuerySource::open(&input, DNSClass::IN, false).unwrap();
		let first: Vec<QueryRecord> = (0..3).map(|_| source.next().unwrap()).collect();
		let second: Vec<QueryRecord> = (0..3).map(|_| source.next().unwrap()).collect();
		assert_eq!(first, second);
		assert_eq!(first[0].owner, "example.com");
		assert_eq!(first[1].qtype, RecordType::AAAA);
		assert_eq!(first[2].qclass, DNSClass::CH);
	}

	#[test]
	fn test_preloaded_cycles() {
		let input = ScriptInput::Inline(SCRIPT.to_string());
		let mut source = QuerySource::open(&input, DNSClass::IN, true).unwrap();
		for _ in 0..2 {
			assert_eq!(source.next().unwrap().owner, "example.com");
			assert_eq!(source.next().unwrap().owner, "www.example.com");
			assert_eq!(source.next().unwrap().owner, "ch.example.com");
		}
	}

	#[test]
	fn test_streaming_matches_preloaded() {
		let input = ScriptInput::Inline(SCRIPT.to_string());
		let mut streaming = QuerySource::open(&input, DNSClass::IN, false).unwrap();
		let mut preloaded = QuerySource::open(&input, DNSClass::IN, true).unwrap();
		for _ in 0..10 {
			assert_eq!(streaming.next().unwrap(), preloaded.next().unwrap());
		}
	}

	#[test]
	fn test_empty_input_is_an_error() {
		let input = ScriptInput::Inline("; only comments\n\n".to_string());
		let mut streaming = QuerySource::open(&input, DNSClass::IN, false).unwrap();
		assert!(streaming.next().is_err());
		assert!(QuerySource::open(&input, DNSClass::IN, true).is_err());
	}

	#[test]
	fn test_file_source_rewinds() {
		let path = std::env::temp_dir().join(format!("dnsblast-script-{}.txt", std::process::id()));
		let mut file = File::create(&path).unwrap();
		write!(file, "one.test\ntwo.test AAAA\n").unwrap();
		drop(file);

		let input = ScriptInput::File(path.clone());
		let mut source = QuerySource::open(&input, DNSClass::IN, false).unwrap();
		let owners: Vec<String> = (0..5).map(|_| source.next().unwrap().owner).collect();
		assert_eq!(owners, ["one.test", "two.test", "one.test", "two.test", "one.test"]);

		std::fs::remove_file(&path).ok();
	}

	#[test]
	fn test_missing_file_is_an_error() {
		let input = ScriptInput::File("/nonexistent/queries.txt".into());
		assert!(QuerySource::open(&input, DNSClass::IN, false).is_err());
	}
}
