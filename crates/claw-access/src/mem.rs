//! In-memory reference implementations of the store traits, for tests only.
//! Never used outside `#[cfg(test)]`: a real deployment supplies its own
//! transactional adapter over §6.1's contracts.

#![cfg(test)]

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::role::{Role, RoleId};
use crate::session::{Session, SessionId};
use crate::store::{
    ApiKey, ApiKeyId, ApiKeyStore, ChallengeConsumeOutcome, PasskeyChallenge, PasskeyChallengeId,
    PasskeyChallengeStore, RoleStore, SessionStore, StoreError, UserStore,
};
use crate::user::{User, UserId};

/// In-memory [`UserStore`].
#[derive(Default)]
pub struct MemUserStore {
    users: Mutex<HashMap<UserId, User>>,
}

impl UserStore for MemUserStore {
    async fn get_by_id(&self, id: &UserId, _cancel: &CancellationToken) -> Result<Option<User>, StoreError> {
        Ok(self.users.lock().unwrap().get(id).cloned())
    }

    async fn get_by_username(&self, username: &str, _cancel: &CancellationToken) -> Result<Option<User>, StoreError> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .values()
            .find(|u| u.username() == Some(username))
            .cloned())
    }

    async fn get_by_identity_link(&self, provider: &str, subject: &str, _cancel: &CancellationToken) -> Result<Option<User>, StoreError> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .values()
            .find(|u| u.identity_links().iter().any(|l| l.provider == provider && l.subject == subject))
            .cloned())
    }

    async fn save(&self, user: &User, _cancel: &CancellationToken) -> Result<(), StoreError> {
        self.users.lock().unwrap().insert(user.id().clone(), user.clone());
        Ok(())
    }

    async fn delete(&self, id: &UserId, _cancel: &CancellationToken) -> Result<(), StoreError> {
        self.users.lock().unwrap().remove(id);
        Ok(())
    }

    async fn delete_abandoned_anonymous(&self, cutoff: DateTime<Utc>, _cancel: &CancellationToken) -> Result<u64, StoreError> {
        let mut users = self.users.lock().unwrap();
        let before = users.len();
        users.retain(|_, u| !u.is_abandoned_anonymous(cutoff));
        Ok((before - users.len()) as u64)
    }
}

/// In-memory [`RoleStore`].
#[derive(Default)]
pub struct MemRoleStore {
    roles: Mutex<HashMap<RoleId, Role>>,
}

impl RoleStore for MemRoleStore {
    async fn get_by_id(&self, id: RoleId, _cancel: &CancellationToken) -> Result<Option<Role>, StoreError> {
        Ok(self.roles.lock().unwrap().get(&id).cloned())
    }

    async fn get_by_code(&self, code: &str, _cancel: &CancellationToken) -> Result<Option<Role>, StoreError> {
        Ok(self.roles.lock().unwrap().values().find(|r| r.code().eq_ignore_ascii_case(code)).cloned())
    }

    async fn get_by_ids(&self, ids: &[RoleId], _cancel: &CancellationToken) -> Result<Vec<Role>, StoreError> {
        let roles = self.roles.lock().unwrap();
        Ok(ids.iter().filter_map(|id| roles.get(id).cloned()).collect())
    }

    async fn list(&self, _cancel: &CancellationToken) -> Result<Vec<Role>, StoreError> {
        let mut by_code: std::collections::BTreeMap<String, Role> = crate::role::system_roles()
            .into_iter()
            .map(|r| (r.code().to_string(), r))
            .collect();
        for role in self.roles.lock().unwrap().values() {
            by_code.insert(role.code().to_string(), role.clone());
        }
        Ok(by_code.into_values().collect())
    }

    async fn save(&self, role: &Role, _cancel: &CancellationToken) -> Result<(), StoreError> {
        self.roles.lock().unwrap().insert(role.id(), role.clone());
        Ok(())
    }

    async fn delete(&self, id: RoleId, _cancel: &CancellationToken) -> Result<(), StoreError> {
        self.roles.lock().unwrap().remove(&id);
        Ok(())
    }
}

/// In-memory [`SessionStore`].
#[derive(Default)]
pub struct MemSessionStore {
    sessions: Mutex<HashMap<SessionId, Session>>,
}

impl SessionStore for MemSessionStore {
    async fn get_by_id(&self, id: SessionId, _cancel: &CancellationToken) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.lock().unwrap().get(&id).cloned())
    }

    async fn get_active_by_user_id(&self, user_id: &UserId, _cancel: &CancellationToken) -> Result<Vec<Session>, StoreError> {
        let now = chrono::Utc::now();
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.user_id() == user_id && s.is_active(now))
            .cloned()
            .collect())
    }

    async fn save(&self, session: &Session, _cancel: &CancellationToken) -> Result<(), StoreError> {
        self.sessions.lock().unwrap().insert(session.id(), session.clone());
        Ok(())
    }

    async fn revoke(&self, id: SessionId, _cancel: &CancellationToken) -> Result<(), StoreError> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions.get_mut(&id).ok_or(StoreError::NotFound { what: format!("session {id}") })?;
        session.revoke(chrono::Utc::now());
        Ok(())
    }

    async fn revoke_all_for_user(&self, user_id: &UserId, _cancel: &CancellationToken) -> Result<u64, StoreError> {
        let now = chrono::Utc::now();
        let mut count = 0;
        for session in self.sessions.lock().unwrap().values_mut() {
            if session.user_id() == user_id && !session.is_revoked() {
                session.revoke(now);
                count += 1;
            }
        }
        Ok(count)
    }

    async fn delete_expired(&self, cutoff: DateTime<Utc>, _cancel: &CancellationToken) -> Result<u64, StoreError> {
        let mut sessions = self.sessions.lock().unwrap();
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(cutoff));
        Ok((before - sessions.len()) as u64)
    }
}

/// In-memory [`ApiKeyStore`].
#[derive(Default)]
pub struct MemApiKeyStore {
    keys: Mutex<HashMap<ApiKeyId, ApiKey>>,
}

impl ApiKeyStore for MemApiKeyStore {
    async fn get_by_id(&self, id: ApiKeyId, _cancel: &CancellationToken) -> Result<Option<ApiKey>, StoreError> {
        Ok(self.keys.lock().unwrap().get(&id).cloned())
    }

    async fn save(&self, key: &ApiKey, _cancel: &CancellationToken) -> Result<(), StoreError> {
        self.keys.lock().unwrap().insert(key.id, key.clone());
        Ok(())
    }

    async fn delete(&self, id: ApiKeyId, _cancel: &CancellationToken) -> Result<(), StoreError> {
        self.keys.lock().unwrap().remove(&id);
        Ok(())
    }

    async fn delete_expired_or_revoked(
        &self,
        expired_before: DateTime<Utc>,
        revoked_before: DateTime<Utc>,
        _cancel: &CancellationToken,
    ) -> Result<u64, StoreError> {
        let mut keys = self.keys.lock().unwrap();
        let before = keys.len();
        keys.retain(|_, k| !(k.expires_at < expired_before || (k.is_revoked && k.expires_at < revoked_before)));
        Ok((before - keys.len()) as u64)
    }
}

/// In-memory [`PasskeyChallengeStore`].
#[derive(Default)]
pub struct MemPasskeyChallengeStore {
    challenges: Mutex<HashMap<PasskeyChallengeId, PasskeyChallenge>>,
}

impl PasskeyChallengeStore for MemPasskeyChallengeStore {
    async fn save(&self, challenge: &PasskeyChallenge, _cancel: &CancellationToken) -> Result<(), StoreError> {
        self.challenges.lock().unwrap().insert(challenge.id, challenge.clone());
        Ok(())
    }

    async fn consume(&self, id: PasskeyChallengeId, _cancel: &CancellationToken) -> Result<ChallengeConsumeOutcome, StoreError> {
        let mut challenges = self.challenges.lock().unwrap();
        let Some(challenge) = challenges.get_mut(&id) else {
            return Ok(ChallengeConsumeOutcome::NotFound);
        };
        if challenge.is_consumed {
            return Ok(ChallengeConsumeOutcome::AlreadyConsumed);
        }
        if challenge.expires_at < chrono::Utc::now() {
            return Ok(ChallengeConsumeOutcome::Expired);
        }
        challenge.is_consumed = true;
        Ok(ChallengeConsumeOutcome::Consumed(challenge.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn user_store_round_trips_by_id_and_username() {
        let store = MemUserStore::default();
        let cancel = CancellationToken::new();
        let now = Utc::now();
        let mut user = User::anonymous(UserId::parse("U-1").unwrap(), now);
        user.set_password_credential(crate::user::PasswordCredential::from_hash("h"), now);
        user.set_username("alice", now);
        store.save(&user, &cancel).await.unwrap();

        let by_id = store.get_by_id(&UserId::parse("U-1").unwrap(), &cancel).await.unwrap();
        assert!(by_id.is_some());

        let by_username = store.get_by_username("alice", &cancel).await.unwrap();
        assert_eq!(by_username.map(|u| u.id().clone()), Some(UserId::parse("U-1").unwrap()));

        assert!(store.get_by_username("nobody", &cancel).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn passkey_challenge_is_one_shot() {
        let store = MemPasskeyChallengeStore::default();
        let cancel = CancellationToken::new();
        let challenge = PasskeyChallenge {
            id: PasskeyChallengeId(uuid::Uuid::new_v4()),
            user_id: UserId::parse("U-1").unwrap(),
            challenge: "opaque".to_string(),
            expires_at: Utc::now() + chrono::Duration::minutes(5),
            is_consumed: false,
        };
        store.save(&challenge, &cancel).await.unwrap();

        let first = store.consume(challenge.id, &cancel).await.unwrap();
        assert!(matches!(first, ChallengeConsumeOutcome::Consumed(_)));

        let second = store.consume(challenge.id, &cancel).await.unwrap();
        assert!(matches!(second, ChallengeConsumeOutcome::AlreadyConsumed));
    }

    #[tokio::test]
    async fn role_store_lists_sorted_by_code() {
        let store = MemRoleStore::default();
        let cancel = CancellationToken::new();
        let custom = Role::new("zzz_custom", "Custom", "a custom role", vec![]).unwrap();
        store.save(&custom, &cancel).await.unwrap();

        let listed = store.list(&cancel).await.unwrap();
        let codes: Vec<&str> = listed.iter().map(Role::code).collect();
        let mut sorted = codes.clone();
        sorted.sort();
        assert_eq!(codes, sorted);
    }

    #[tokio::test]
    async fn role_store_list_unions_system_roles_with_stored_roles() {
        let store = MemRoleStore::default();
        let cancel = CancellationToken::new();
        let custom = Role::new("custom_reader", "Custom Reader", "a custom role", vec![]).unwrap();
        store.save(&custom, &cancel).await.unwrap();

        let listed = store.list(&cancel).await.unwrap();
        let codes: Vec<&str> = listed.iter().map(Role::code).collect();
        assert!(codes.contains(&"admin"));
        assert!(codes.contains(&"user"));
        assert!(codes.contains(&"custom_reader"));
        assert_eq!(codes.len(), 3);
    }
}
