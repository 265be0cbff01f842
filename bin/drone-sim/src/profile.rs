//! Regional drone profiles and random environment readings

use rand::Rng;
use std::fmt;
use std::str::FromStr;

/// One set of measurements taken by a drone
#[derive(Clone, Debug, PartialEq)]
pub struct EnvironmentReading {
    /// hPa
    pub pressure: u32,
    /// kW/m²
    pub radiation: f64,
    /// °C
    pub temperature: i32,
    /// % relative humidity
    pub humidity: u32,
}

impl EnvironmentReading {
    /// Draw every measurement from its plausible world-wide range
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self {
            pressure: rng.gen_range(870..=1082),
            radiation: rng.gen_range(4.5..=6.5),
            temperature: rng.gen_range(-89..=56),
            humidity: rng.gen_range(15..=70),
        }
    }
}

/// Region a drone flies in; each region formats readings its own way
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Region {
    North,
    South,
    East,
    West,
}

impl Region {
    pub const ALL: [Region; 4] = [Region::North, Region::South, Region::East, Region::West];

    pub fn name(&self) -> &'static str {
        match self {
            Region::North => "north",
            Region::South => "south",
            Region::East => "east",
            Region::West => "west",
        }
    }

    fn separator(&self) -> char {
        match self {
            Region::North => '-',
            Region::South => ';',
            Region::East => ',',
            Region::West => '#',
        }
    }

    fn brackets(&self) -> Option<(char, char)> {
        match self {
            Region::South => Some(('(', ')')),
            Region::East => Some(('{', '}')),
            Region::North | Region::West => None,
        }
    }

    /// Render a reading as `pressure<sep>radiation<sep>temperature<sep>humidity`,
    /// wrapped in the region's brackets if it has any
    pub fn format(&self, reading: &EnvironmentReading) -> String {
        let sep = self.separator();
        let body = format!(
            "{}{sep}{:.1}{sep}{}{sep}{}",
            reading.pressure, reading.radiation, reading.temperature, reading.humidity
        );
        match self.brackets() {
            Some((open, close)) => format!("{}{}{}", open, body, close),
            None => body,
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Region {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Region::ALL
            .into_iter()
            .find(|region| region.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown region '{}', expected north, south, east or west", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use swarm_node::DroneReading;

    fn sample() -> EnvironmentReading {
        EnvironmentReading {
            pressure: 1013,
            radiation: 4.2,
            temperature: -12,
            humidity: 60,
        }
    }

    #[test]
    fn test_regional_formats() {
        let reading = sample();
        assert_eq!(Region::North.format(&reading), "1013-4.2--12-60");
        assert_eq!(Region::South.format(&reading), "(1013;4.2;-12;60)");
        assert_eq!(Region::East.format(&reading), "{1013,4.2,-12,60}");
        assert_eq!(Region::West.format(&reading), "1013#4.2#-12#60");
    }

    #[test]
    fn test_every_format_parses_to_same_record() {
        let reading = sample();
        for region in Region::ALL {
            let parsed = DroneReading::parse(&region.format(&reading)).unwrap();
            assert_eq!(parsed.to_record(), "[-12|60|1013|4.2]", "region {}", region);
        }
    }

    #[test]
    fn test_random_readings_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let reading = EnvironmentReading::random(&mut rng);
            assert!((870..=1082).contains(&reading.pressure));
            assert!((4.5..=6.5).contains(&reading.radiation));
            assert!((-89..=56).contains(&reading.temperature));
            assert!((15..=70).contains(&reading.humidity));
        }
    }

    #[test]
    fn test_parse_region() {
        assert_eq!("North".parse::<Region>().unwrap(), Region::North);
        assert!("up".parse::<Region>().is_err());
    }
}
