//! Worker load reports carried by `DISCOVERY_REPLY`
//!
//! Payload format: `connectionCount;resourceUsage;nodeId;port`

use crate::error::ProtocolError;
use crate::message::DELIMITER;

const FIELD_SEPARATOR: char = ';';

/// Load metrics a worker announces in answer to a discovery solicitation
#[derive(Clone, Debug, PartialEq)]
pub struct NodeReport {
    pub connection_count: u32,
    /// Blended CPU/memory utilisation in `[0, 100]`
    pub resource_usage: f64,
    pub node_id: String,
    /// Port the worker's reliable listener is bound to
    pub port: u16,
}

impl NodeReport {
    /// Render the `;`-separated payload, usage with at most two decimals
    pub fn encode(&self) -> String {
        format!(
            "{}{sep}{}{sep}{}{sep}{}",
            self.connection_count,
            format_usage(self.resource_usage),
            self.node_id,
            self.port,
            sep = FIELD_SEPARATOR
        )
    }

    /// Parse a report payload. Exactly four fields are required.
    pub fn parse(payload: &str) -> Result<Self, ProtocolError> {
        let fields: Vec<&str> = payload.split(FIELD_SEPARATOR).collect();
        if fields.len() != 4 {
            return Err(ProtocolError::malformed_report(
                payload,
                format!("expected 4 fields, found {}", fields.len()),
            ));
        }

        let connection_count = fields[0].trim().parse::<u32>().map_err(|e| {
            ProtocolError::malformed_report(payload, format!("connection count: {}", e))
        })?;

        let resource_usage = fields[1].trim().parse::<f64>().map_err(|e| {
            ProtocolError::malformed_report(payload, format!("resource usage: {}", e))
        })?;
        if !(0.0..=100.0).contains(&resource_usage) {
            return Err(ProtocolError::malformed_report(
                payload,
                format!("resource usage {} outside [0, 100]", resource_usage),
            ));
        }

        let node_id = fields[2].trim();
        if node_id.is_empty() {
            return Err(ProtocolError::malformed_report(payload, "empty node id"));
        }
        // the id becomes the kind of a tagged drone reading
        if node_id.contains(DELIMITER) || node_id.chars().any(char::is_control) {
            return Err(ProtocolError::malformed_report(
                payload,
                format!("node id '{}' is not usable as a message kind", node_id),
            ));
        }

        let port = fields[3]
            .trim()
            .parse::<u16>()
            .map_err(|e| ProtocolError::malformed_report(payload, format!("port: {}", e)))?;

        Ok(Self {
            connection_count,
            resource_usage,
            node_id: node_id.to_string(),
            port,
        })
    }
}

/// Two decimals, trailing zeros dropped (`12.5`, `40`, `33.33`)
fn format_usage(usage: f64) -> String {
    let fixed = format!("{:.2}", usage);
    fixed.trim_end_matches('0').trim_end_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_report() {
        let report = NodeReport::parse("0;12.5;w1;9001").unwrap();
        assert_eq!(report.connection_count, 0);
        assert_eq!(report.resource_usage, 12.5);
        assert_eq!(report.node_id, "w1");
        assert_eq!(report.port, 9001);
    }

    #[test]
    fn test_encode() {
        let report = NodeReport {
            connection_count: 3,
            resource_usage: 12.5,
            node_id: "w1".to_string(),
            port: 9001,
        };
        assert_eq!(report.encode(), "3;12.5;w1;9001");
        assert_eq!(NodeReport::parse(&report.encode()).unwrap(), report);
    }

    #[test]
    fn test_usage_formatting() {
        assert_eq!(format_usage(40.0), "40");
        assert_eq!(format_usage(33.3333), "33.33");
        assert_eq!(format_usage(0.0), "0");
        assert_eq!(format_usage(99.999), "100");
    }

    #[test]
    fn test_wrong_field_count() {
        // older three-field replies omitted the port
        assert!(NodeReport::parse("0;12.5;w1").is_err());
        assert!(NodeReport::parse("0;12.5;w1;9001;extra").is_err());
        assert!(NodeReport::parse("").is_err());
    }

    #[test]
    fn test_unparsable_numbers() {
        assert!(NodeReport::parse("x;12.5;w1;9001").is_err());
        assert!(NodeReport::parse("-1;12.5;w1;9001").is_err());
        assert!(NodeReport::parse("0;abc;w1;9001").is_err());
        assert!(NodeReport::parse("0;12.5;w1;port").is_err());
        assert!(NodeReport::parse("0;12.5;w1;99999").is_err());
    }

    #[test]
    fn test_out_of_range_usage_and_empty_id() {
        assert!(NodeReport::parse("0;100.5;w1;9001").is_err());
        assert!(NodeReport::parse("0;NaN;w1;9001").is_err());
        assert!(NodeReport::parse("0;12.5; ;9001").is_err());
        assert!(NodeReport::parse("0;1;bad|id;9001").is_err());
        assert!(NodeReport::parse("0;1;bad\nid;9001").is_err());
    }
}
