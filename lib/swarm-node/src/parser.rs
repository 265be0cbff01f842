//! Drone sensor reading parser
//!
//! Drones from different regions format the same four measurements with
//! different separators and decorations, e.g. `23.5,60,1013#4.2`,
//! `(1013;4.2;23.5;60)` or `1013-4.2--12-60`. The parser walks the raw text
//! once and collects the numeric slots in arrival order.

use swarm_core::ProtocolError;

const SLOTS: usize = 4;

/// Four numeric slots in the order the drone sent them
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DroneReading {
    pub slots: [String; SLOTS],
}

impl DroneReading {
    /// Extract the slots from a raw reading.
    ///
    /// Digits, `.` and a `-` not preceded by a digit are kept. Otherwise one
    /// of `-,;#` closes the current slot and anything else is skipped. Text
    /// after the fourth slot is ignored.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let mut reading = DroneReading::default();
        let mut slot = 0;
        let mut previous: Option<char> = None;
        let mut found_value = false;

        for c in raw.chars() {
            let negative_sign = c == '-' && !previous.is_some_and(|p| p.is_ascii_digit());
            if c.is_ascii_digit() || c == '.' || negative_sign {
                reading.slots[slot].push(c);
                found_value = true;
            } else if matches!(c, '-' | ',' | ';' | '#') {
                slot += 1;
                if slot == SLOTS {
                    break;
                }
            }
            previous = Some(c);
        }

        if !found_value {
            return Err(ProtocolError::MalformedReading(raw.to_string()));
        }
        Ok(reading)
    }

    /// Canonical stored form `[s2|s3|s0|s1]`
    pub fn to_record(&self) -> String {
        format!(
            "[{}|{}|{}|{}]",
            self.slots[2], self.slots[3], self.slots[0], self.slots[1]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slots(raw: &str) -> Vec<String> {
        DroneReading::parse(raw).unwrap().slots.to_vec()
    }

    #[test]
    fn test_mixed_separators() {
        assert_eq!(slots("23.5,60,1013#4.2"), vec!["23.5", "60", "1013", "4.2"]);
        assert_eq!(
            DroneReading::parse("23.5,60,1013#4.2").unwrap().to_record(),
            "[1013|4.2|23.5|60]"
        );
    }

    #[test]
    fn test_regional_formats() {
        assert_eq!(slots("(1013;4.2;23.5;60)"), vec!["1013", "4.2", "23.5", "60"]);
        assert_eq!(slots("{1013,4.2,23.5,60}"), vec!["1013", "4.2", "23.5", "60"]);
        assert_eq!(slots("1013#4.2#23.5#60"), vec!["1013", "4.2", "23.5", "60"]);
    }

    #[test]
    fn test_dash_separator_with_negative_values() {
        // after a digit '-' separates, otherwise it is a sign
        assert_eq!(slots("1013-4.2--12.5-60"), vec!["1013", "4.2", "-12.5", "60"]);
        assert_eq!(slots("-3,60,1013,5"), vec!["-3", "60", "1013", "5"]);
    }

    #[test]
    fn test_extra_slots_ignored() {
        assert_eq!(slots("1,2,3,4,5,6"), vec!["1", "2", "3", "4"]);
    }

    #[test]
    fn test_short_reading_leaves_empty_slots() {
        let reading = DroneReading::parse("12,34").unwrap();
        assert_eq!(reading.to_record(), "[||12|34]");
    }

    #[test]
    fn test_no_values_rejected() {
        assert!(DroneReading::parse("").is_err());
        assert!(DroneReading::parse("(;;)").is_err());
        assert!(matches!(
            DroneReading::parse("abc"),
            Err(ProtocolError::MalformedReading(_))
        ));
    }
}
