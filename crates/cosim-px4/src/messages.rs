//! Payloads exchanged with the PX4 firmware.

use cosim_protocol::Message;
use serde::{Deserialize, Serialize};

/// Vehicle model flown when none is given.
pub const DEFAULT_MODEL: &str = "x500";

/// A position in a mission plan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
    /// Altitude in meters.
    pub alt: f64,
}

impl Waypoint {
    pub const fn new(lat: f64, lon: f64, alt: f64) -> Self {
        Self { lat, lon, alt }
    }
}

/// Three waypoints around the PX4 SITL home position.
pub const DEFAULT_MISSION: [Waypoint; 3] = [
    Waypoint::new(47.39803986, 8.54557254, 25.0),
    Waypoint::new(47.39803622236247, 8.545014643942551, 25.0),
    Waypoint::new(47.397825620791885, 8.545009283016327, 25.0),
];

/// Vehicle position in meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// A pose with its simulation timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct State {
    /// Seconds since the start of the simulation.
    pub time: f64,
    pub pose: Pose,
}

/// Trajectory flown during a mission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct States(pub Vec<State>);

impl States {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, State> {
        self.0.iter()
    }

    /// Whether timestamps never decrease.
    pub fn is_time_ordered(&self) -> bool {
        self.0.windows(2).all(|w| w[0].time <= w[1].time)
    }

    /// Total simulated time covered by the trajectory.
    pub fn duration(&self) -> f64 {
        match (self.0.first(), self.0.last()) {
            (Some(first), Some(last)) => last.time - first.time,
            _ => 0.0,
        }
    }
}

impl IntoIterator for States {
    type Item = State;
    type IntoIter = std::vec::IntoIter<State>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a States {
    type Item = &'a State;
    type IntoIter = std::slice::Iter<'a, State>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<State> for States {
    fn from_iter<I: IntoIterator<Item = State>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Message for States {
    const TYPE: &'static str = "px4.States";
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

/// Mission sent to the firmware at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub mission: Vec<Waypoint>,
    #[serde(default = "default_model")]
    pub model: String,
}

impl Configuration {
    /// Fly `mission` with the default vehicle model.
    pub fn new(mission: impl IntoIterator<Item = Waypoint>) -> Self {
        Self {
            mission: mission.into_iter().collect(),
            model: default_model(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new(DEFAULT_MISSION)
    }
}

impl Message for Configuration {
    const TYPE: &'static str = "px4.Configuration";
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(time: f64) -> State {
        State {
            time,
            pose: Pose { x: 0.0, y: 0.0, z: time },
        }
    }

    #[test]
    fn test_default_configuration() {
        let config = Configuration::default();
        assert_eq!(config.mission.len(), 3);
        assert_eq!(config.model, "x500");
        assert_eq!(config.mission[0].alt, 25.0);
    }

    #[test]
    fn test_model_defaults_when_missing() {
        let config: Configuration =
            serde_json::from_str(r#"{"mission": [{"lat": 1.0, "lon": 2.0, "alt": 3.0}]}"#).unwrap();
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.mission, vec![Waypoint::new(1.0, 2.0, 3.0)]);
    }

    #[test]
    fn test_states_serialize_as_list() {
        let states: States = [state(0.0), state(0.5)].into_iter().collect();
        let value = serde_json::to_value(&states).unwrap();
        assert!(value.is_array());
        assert_eq!(value[1]["pose"]["z"], 0.5);
    }

    #[test]
    fn test_time_ordering() {
        let ordered: States = [state(0.0), state(0.0), state(1.0)].into_iter().collect();
        assert!(ordered.is_time_ordered());
        assert_eq!(ordered.duration(), 1.0);

        let shuffled: States = [state(1.0), state(0.5)].into_iter().collect();
        assert!(!shuffled.is_time_ordered());

        assert!(States::default().is_time_ordered());
        assert_eq!(States::default().duration(), 0.0);
    }
}
