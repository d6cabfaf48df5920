//! Charger identity
//!
//! A station is addressed by its serial number. Connector 0 is the aggregate
//! identity of the whole station; connectors 1..N are addressed individually
//! and keyed as `<serial>#<connector>`.

use std::fmt;

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::form_urlencoded;

/// Query keys that may carry the station serial number (matched case-insensitively).
const SERIAL_QUERY_KEYS: &[&str] = &[
    "cid",
    "chargepointid",
    "charge_point_id",
    "chargeboxid",
    "charge_box_id",
    "chargerid",
];

const CONNECTOR_QUERY_KEYS: &[&str] = &["connectorid", "connector_id"];

const KEY_SEPARATOR: char = '#';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("no charger serial number in request path or query")]
    MissingSerial,
    #[error("connector id is not a number: {0}")]
    InvalidConnector(String),
    #[error("serial number may not contain '#': {0}")]
    ReservedCharacter(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChargerIdentity {
    pub serial_number: String,
    /// 0 addresses the station as a whole
    pub connector_id: u32,
}

impl ChargerIdentity {
    pub fn new(serial_number: impl Into<String>, connector_id: u32) -> Self {
        Self {
            serial_number: serial_number.into(),
            connector_id,
        }
    }

    pub fn aggregate(serial_number: impl Into<String>) -> Self {
        Self::new(serial_number, 0)
    }

    pub fn is_aggregate(&self) -> bool {
        self.connector_id == 0
    }

    /// The station-level identity this identity belongs to.
    pub fn to_aggregate(&self) -> Self {
        Self::aggregate(self.serial_number.clone())
    }

    /// Same station, different connector.
    pub fn with_connector(&self, connector_id: u32) -> Self {
        Self::new(self.serial_number.clone(), connector_id)
    }

    /// Canonical storage key: `<serial>` or `<serial>#<connector>`.
    pub fn key(&self) -> String {
        if self.is_aggregate() {
            self.serial_number.clone()
        } else {
            format!("{}{}{}", self.serial_number, KEY_SEPARATOR, self.connector_id)
        }
    }

    /// Inverse of [`ChargerIdentity::key`].
    pub fn from_key(key: &str) -> Option<Self> {
        match key.rsplit_once(KEY_SEPARATOR) {
            Some((serial, connector)) => {
                let connector_id = connector.parse().ok()?;
                (!serial.is_empty()).then(|| Self::new(serial, connector_id))
            }
            None => (!key.is_empty()).then(|| Self::aggregate(key)),
        }
    }

    /// Resolve the identity of an incoming WebSocket upgrade.
    ///
    /// Accepted paths are `/ocpp/<serial>[/<connector>]` and
    /// `/<serial>[/<connector>]`. The path wins over query parameters.
    pub fn from_request(path: &str, query: Option<&str>) -> Result<Self, IdentityError> {
        let segments: Vec<String> = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| percent_decode_str(s).decode_utf8_lossy().trim().to_string())
            .collect();

        let rest = match segments.first() {
            Some(first) if first.eq_ignore_ascii_case("ocpp") => &segments[1..],
            _ => &segments[..],
        };

        let path_serial = rest.first().filter(|s| !s.is_empty()).cloned();
        let path_connector = rest.get(1).filter(|s| !s.is_empty()).cloned();

        let mut query_serial = None;
        let mut query_connector = None;
        if let Some(query) = query {
            for (key, value) in form_urlencoded::parse(query.as_bytes()) {
                let value = value.trim();
                if value.is_empty() {
                    continue;
                }
                let key = key.to_ascii_lowercase();
                if query_serial.is_none() && SERIAL_QUERY_KEYS.contains(&key.as_str()) {
                    query_serial = Some(value.to_string());
                } else if query_connector.is_none()
                    && CONNECTOR_QUERY_KEYS.contains(&key.as_str())
                {
                    query_connector = Some(value.to_string());
                }
            }
        }

        let serial = path_serial
            .or(query_serial)
            .ok_or(IdentityError::MissingSerial)?;
        // `A#1` would collide with connector 1 of station `A`
        if serial.contains(KEY_SEPARATOR) {
            return Err(IdentityError::ReservedCharacter(serial));
        }

        let connector_id = match path_connector.or(query_connector) {
            Some(raw) => raw
                .parse::<u32>()
                .map_err(|_| IdentityError::InvalidConnector(raw))?,
            None => 0,
        };

        Ok(Self::new(serial, connector_id))
    }
}

impl fmt::Display for ChargerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/ocpp/CP001", None, "CP001", 0)]
    #[case("/ocpp/CP001/2", None, "CP001", 2)]
    #[case("/CP001", None, "CP001", 0)]
    #[case("/CP001/1", None, "CP001", 1)]
    #[case("/", Some("cid=CP9"), "CP9", 0)]
    #[case("/", Some("ChargePointId=CP9&connectorId=3"), "CP9", 3)]
    #[case("/ocpp", Some("CHARGE_BOX_ID=%20CP7%20"), "CP7", 0)]
    #[case("/ocpp/CP%20X", None, "CP X", 0)]
    #[case("/ocpp/PATH", Some("chargerId=QUERY"), "PATH", 0)]
    #[case("/ocpp/", Some("cid=%20%20&chargeBoxId=CP5"), "CP5", 0)]
    fn resolves_identity(
        #[case] path: &str,
        #[case] query: Option<&str>,
        #[case] serial: &str,
        #[case] connector: u32,
    ) {
        let identity = ChargerIdentity::from_request(path, query).unwrap();
        assert_eq!(identity, ChargerIdentity::new(serial, connector));
    }

    #[rstest]
    #[case("/", None)]
    #[case("/ocpp", Some("cid=%20%20"))]
    #[case("/ocpp/%20", Some("unrelated=CP1"))]
    fn missing_serial_is_rejected(#[case] path: &str, #[case] query: Option<&str>) {
        assert_eq!(
            ChargerIdentity::from_request(path, query),
            Err(IdentityError::MissingSerial)
        );
    }

    #[rstest]
    #[case("/ocpp/A%231", None, "A#1")]
    #[case("/A%23", None, "A#")]
    #[case("/", Some("cid=A%231"), "A#1")]
    fn serial_with_key_separator_is_rejected(
        #[case] path: &str,
        #[case] query: Option<&str>,
        #[case] serial: &str,
    ) {
        assert_eq!(
            ChargerIdentity::from_request(path, query),
            Err(IdentityError::ReservedCharacter(serial.into()))
        );
    }

    #[test]
    fn non_numeric_connector_is_rejected() {
        assert_eq!(
            ChargerIdentity::from_request("/ocpp/CP1/left", None),
            Err(IdentityError::InvalidConnector("left".into()))
        );
    }

    #[test]
    fn key_round_trips() {
        for identity in [ChargerIdentity::aggregate("CP1"), ChargerIdentity::new("CP1", 4)] {
            assert_eq!(ChargerIdentity::from_key(&identity.key()), Some(identity));
        }
        assert_eq!(ChargerIdentity::new("CP1", 4).key(), "CP1#4");
        assert_eq!(ChargerIdentity::from_key(""), None);
    }
}
