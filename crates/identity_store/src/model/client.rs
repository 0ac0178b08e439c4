//! OAuth client entity.
//!
//! # Invariants
//! - `client_id` follows the shared ID format and never changes.
//! - Clients are removed physically on delete.
//! - `state` left unset at create time is derived from the caller.

use super::ids::validate_id;
use super::{Entity, EntityIdentifiers, KindDescriptor, Model, ValidationError};
use crate::context::{Caller, RequestContext};
use crate::store::row::ProjectedRow;
use crate::store::{StoreError, StoreResult};
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

const CLIENT_COLUMNS: &[(&str, &str)] = &[
    ("ids.client_id", "client_id"),
    ("created_at", "created_at"),
    ("updated_at", "updated_at"),
    ("name", "name"),
    ("description", "description"),
    ("secret", "client_secret"),
    ("redirect_uris", "redirect_uris"),
    ("state", "state"),
    ("skip_authorization", "skip_authorization"),
    ("endorsed", "endorsed"),
    ("grants", "grants"),
];

pub static CLIENT_KIND: KindDescriptor = KindDescriptor {
    name: "client",
    table: "clients",
    id_column: "client_id",
    alternate_key: None,
    columns: CLIENT_COLUMNS,
    soft_delete: false,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientIdentifiers {
    pub client_id: String,
}

impl ClientIdentifiers {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
        }
    }
}

impl EntityIdentifiers for ClientIdentifiers {
    fn human_id(&self) -> &str {
        &self.client_id
    }
}

/// Review state of a client registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientState {
    Requested,
    Approved,
    Rejected,
}

impl ClientState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "requested" => Some(Self::Requested),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// OAuth grant a client may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    AuthorizationCode,
    Password,
    RefreshToken,
    ClientCredentials,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    #[serde(flatten)]
    pub model: Model,
    pub ids: ClientIdentifiers,
    pub name: String,
    pub description: String,
    pub secret: String,
    pub redirect_uris: Vec<String>,
    /// `None` means "derive from the caller" on create and "leave as is" on update.
    pub state: Option<ClientState>,
    pub skip_authorization: bool,
    pub endorsed: bool,
    pub grants: Vec<GrantType>,
}

impl Client {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            ids: ClientIdentifiers::new(client_id),
            ..Self::default()
        }
    }
}

impl Entity for Client {
    type Ids = ClientIdentifiers;

    fn descriptor() -> &'static KindDescriptor {
        &CLIENT_KIND
    }

    fn model(&self) -> &Model {
        &self.model
    }

    fn model_mut(&mut self) -> &mut Model {
        &mut self.model
    }

    fn ids(&self) -> ClientIdentifiers {
        self.ids.clone()
    }

    fn set_context(&mut self, ctx: &RequestContext) {
        if self.state.is_none() {
            self.state = Some(match ctx.caller() {
                Caller::Admin => ClientState::Approved,
                Caller::User => ClientState::Requested,
            });
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        validate_id(CLIENT_KIND.name, &self.ids.client_id)?;
        for uri in &self.redirect_uris {
            if uri.is_empty() || uri.chars().any(char::is_whitespace) || !uri.contains(':') {
                return Err(ValidationError::InvalidRedirectUri(uri.clone()));
            }
        }
        Ok(())
    }

    fn write_columns(&self) -> StoreResult<Vec<(&'static str, Value)>> {
        let mut columns = vec![
            ("name", Value::Text(self.name.clone())),
            ("description", Value::Text(self.description.clone())),
            ("client_secret", Value::Text(self.secret.clone())),
            ("redirect_uris", json_value(&self.redirect_uris)?),
            ("skip_authorization", Value::Integer(i64::from(self.skip_authorization))),
            ("endorsed", Value::Integer(i64::from(self.endorsed))),
            ("grants", json_value(&self.grants)?),
        ];
        if let Some(state) = self.state {
            columns.push(("state", Value::Text(state.as_str().to_string())));
        }
        Ok(columns)
    }

    fn from_row(row: &ProjectedRow<'_, '_>) -> StoreResult<Self> {
        let state = match row.get_opt::<String>("state")? {
            Some(value) => Some(ClientState::parse(&value).ok_or_else(|| {
                StoreError::InvalidData(format!("invalid client state `{value}` in clients.state"))
            })?),
            None => None,
        };

        Ok(Self {
            model: Model::from_row(row)?,
            ids: ClientIdentifiers::new(row.get::<String>("client_id")?),
            name: row.get("name")?,
            description: row.get("description")?,
            secret: row.get("client_secret")?,
            redirect_uris: row.get_json("redirect_uris")?,
            state,
            skip_authorization: row.get("skip_authorization")?,
            endorsed: row.get("endorsed")?,
            grants: row.get_json("grants")?,
        })
    }
}

pub(crate) fn json_value<T: Serialize>(value: &T) -> StoreResult<Value> {
    serde_json::to_string(value)
        .map(Value::Text)
        .map_err(|err| StoreError::InvalidData(format!("cannot encode column value: {err}")))
}

#[cfg(test)]
mod tests {
    use super::{Client, ClientState, GrantType};
    use crate::context::{Caller, RequestContext};
    use crate::model::{Entity, ValidationError};

    #[test]
    fn set_context_derives_state_from_caller() {
        let mut by_user = Client::new("cli-user");
        by_user.set_context(&RequestContext::background());
        assert_eq!(by_user.state, Some(ClientState::Requested));

        let mut by_admin = Client::new("cli-admin");
        by_admin.set_context(&RequestContext::background().with_caller(Caller::Admin));
        assert_eq!(by_admin.state, Some(ClientState::Approved));
    }

    #[test]
    fn set_context_keeps_explicit_state() {
        let mut client = Client::new("cli-rejected");
        client.state = Some(ClientState::Rejected);
        client.set_context(&RequestContext::background().with_caller(Caller::Admin));
        assert_eq!(client.state, Some(ClientState::Rejected));
    }

    #[test]
    fn validate_rejects_bad_redirect_uris() {
        let mut client = Client::new("cli-web");
        client.redirect_uris = vec!["https://example.com/cb".to_string()];
        assert!(client.validate().is_ok());

        client.redirect_uris.push("not a uri".to_string());
        assert_eq!(
            client.validate(),
            Err(ValidationError::InvalidRedirectUri("not a uri".to_string()))
        );
    }

    #[test]
    fn write_columns_skip_unset_state() {
        let mut client = Client::new("cli-cols");
        client.grants = vec![GrantType::AuthorizationCode];
        let columns = client.write_columns().unwrap();
        assert!(columns.iter().all(|(name, _)| *name != "state"));
        assert!(columns.iter().any(|(name, _)| *name == "grants"));
    }
}
