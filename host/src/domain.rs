use serde::{Deserialize, Deserializer};
use serde_json::{Map, Number, Value};

/// device id of the living-room door switch
pub const DOOR_ID: &str = "door_sala";
/// device id of the temperature sensor
pub const TEMP_SENSOR_ID: &str = "temp_sensor";
/// switch state that means "open"
pub const DOOR_OPEN_STATE: &str = "ON";

/// body returned by the hub's state endpoint
#[derive(Clone, Debug, Default, Deserialize)]
pub struct StateResponse {
    /// anything but a truthy value turns the refresh into a no-op
    #[serde(default, deserialize_with = "truthy")]
    pub ok: bool,

    #[serde(default, deserialize_with = "object_or_empty")]
    pub state: StateSnapshot,
}

/// device id -> raw device entry, rebuilt on every poll
///
/// only the entries the panel reads get typed; other devices may have any
/// shape.
pub type StateSnapshot = Map<String, Value>;

impl StateResponse {
    /// typed view of one device; entries that are not objects count as absent
    pub fn device(&self, id: &str) -> Option<DeviceReading> {
        match self.state.get(id)? {
            entry @ Value::Object(_) => DeviceReading::deserialize(entry).ok(),
            _ => None,
        }
    }
}

/// one device entry of the snapshot
///
/// the hub also sends `name` and `type`; those are ignored here.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct DeviceReading {
    #[serde(default, deserialize_with = "display_text")]
    pub state: Option<String>,

    /// numbers are formatted the way a browser prints them: 20.0 -> "20"
    #[serde(default, deserialize_with = "display_text")]
    pub reading: Option<String>,
}

impl DeviceReading {
    pub fn is_on(&self) -> bool {
        self.state.as_deref() == Some(DOOR_OPEN_STATE)
    }
}

fn truthy<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => false,
        Value::Bool(b) => b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    })
}

fn object_or_empty<'de, D>(deserializer: D) -> Result<StateSnapshot, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Object(map) => map,
        _ => Map::new(),
    })
}

fn display_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(number_text(&n)),
        Some(other) => Some(other.to_string()),
    })
}

/// ecmascript Number::toString for the values json can carry
pub fn number_text(n: &Number) -> String {
    if n.is_i64() || n.is_u64() {
        return n.to_string();
    }
    let Some(f) = n.as_f64() else {
        return n.to_string();
    };
    if f == 0.0 {
        return "0".to_string();
    }
    let magnitude = f.abs();
    if magnitude >= 1e21 || magnitude < 1e-6 {
        // rust prints 1e21 / 1.5e-7, js wants 1e+21 / 1.5e-7
        let text = format!("{:e}", f);
        return match text.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{}e+{}", mantissa, exp),
            _ => text,
        };
    }
    format!("{}", f)
}
