//! Usuarios en línea
//!
//! Cada socket de `/ws/users/online` registra a su usuario al conectar y lo
//! retira al desconectar. En ambos casos se publica `users_update` con la
//! lista completa en el tópico `presence`. Un usuario con varias pestañas
//! abiertas aparece una sola vez.

use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;
use tracing::info;

use crate::services::notification_bus::{NotificationBus, SubscriberId, Topic};

pub const USERS_UPDATE: &str = "users_update";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OnlineUser {
    pub username: String,
    pub role: String,
    pub initials: String,
    pub status: &'static str,
}

impl OnlineUser {
    pub fn new(username: &str, role: &str) -> Self {
        Self {
            username: username.to_string(),
            role: role.to_string(),
            initials: initials(username),
            status: "online",
        }
    }
}

/// "ana.perez" → "AP", "luis" → "LU"
fn initials(username: &str) -> String {
    let parts: Vec<&str> = username
        .split(|c: char| c == '.' || c == '_' || c == '-' || c.is_whitespace())
        .filter(|p| !p.is_empty())
        .collect();

    let initials: String = match parts.as_slice() {
        [first, second, ..] => first.chars().take(1).chain(second.chars().take(1)).collect(),
        [only] => only.chars().take(2).collect(),
        [] => "U".to_string(),
    };
    initials.to_uppercase()
}

pub struct PresenceRegistry {
    bus: NotificationBus,
    connections: Mutex<HashMap<SubscriberId, OnlineUser>>,
}

impl PresenceRegistry {
    pub fn new(bus: NotificationBus) -> Self {
        Self {
            bus,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Registra la conexión y anuncia la lista nueva
    pub async fn join(&self, id: SubscriberId, user: OnlineUser) -> Vec<OnlineUser> {
        let mut connections = self.connections.lock().await;
        info!("🟢 {} en línea", user.username);
        connections.insert(id, user);

        // se anuncia con el registro tomado para que las listas salgan en orden
        let users = unique_users(&connections);
        self.announce(&users).await;
        users
    }

    pub async fn leave(&self, id: SubscriberId) {
        let mut connections = self.connections.lock().await;
        if let Some(user) = connections.remove(&id) {
            info!("🔴 {} desconectado", user.username);
            let users = unique_users(&connections);
            self.announce(&users).await;
        }
    }

    pub async fn users(&self) -> Vec<OnlineUser> {
        unique_users(&*self.connections.lock().await)
    }

    async fn announce(&self, users: &[OnlineUser]) {
        self.bus
            .broadcast(
                &Topic::Presence,
                USERS_UPDATE,
                json!({ "users": users, "total": users.len() }),
            )
            .await;
    }
}

fn unique_users(connections: &HashMap<SubscriberId, OnlineUser>) -> Vec<OnlineUser> {
    let by_name: BTreeMap<&str, &OnlineUser> = connections
        .values()
        .map(|user| (user.username.as_str(), user))
        .collect();
    by_name.into_values().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initials() {
        assert_eq!(initials("ana.perez"), "AP");
        assert_eq!(initials("luis"), "LU");
        assert_eq!(initials("__"), "U");
    }

    #[tokio::test]
    async fn test_join_and_leave_broadcast_full_list() {
        let bus = NotificationBus::new(8);
        let presence = PresenceRegistry::new(bus.clone());

        let (watcher, mut rx) = bus.register().await;
        bus.subscribe(Topic::Presence, watcher).await.unwrap();

        let (ana, _ana_rx) = bus.register().await;
        let (luis, _luis_rx) = bus.register().await;
        presence.join(ana, OnlineUser::new("ana", "seller")).await;
        let users = presence.join(luis, OnlineUser::new("luis", "admin")).await;
        assert_eq!(users.len(), 2);

        let first = rx.try_recv().unwrap();
        assert_eq!(first.event_type, "users_update");
        assert_eq!(first.data["total"], 1);
        let second = rx.try_recv().unwrap();
        assert_eq!(second.data["total"], 2);
        assert_eq!(second.data["users"][0]["username"], "ana");
        assert_eq!(second.data["users"][1]["role"], "admin");

        presence.leave(ana).await;
        let third = rx.try_recv().unwrap();
        assert_eq!(third.data["total"], 1);
        assert_eq!(third.data["users"][0]["username"], "luis");
    }

    #[tokio::test]
    async fn test_same_user_in_two_tabs_counts_once() {
        let bus = NotificationBus::default();
        let presence = PresenceRegistry::new(bus.clone());
        let (tab1, _rx1) = bus.register().await;
        let (tab2, _rx2) = bus.register().await;

        presence.join(tab1, OnlineUser::new("ana", "seller")).await;
        presence.join(tab2, OnlineUser::new("ana", "seller")).await;
        assert_eq!(presence.users().await.len(), 1);

        // sigue en línea mientras quede una pestaña
        presence.leave(tab1).await;
        assert_eq!(presence.users().await.len(), 1);
        presence.leave(tab2).await;
        assert!(presence.users().await.is_empty());
    }

    #[tokio::test]
    async fn test_leave_of_unknown_connection_is_silent() {
        let bus = NotificationBus::new(4);
        let presence = PresenceRegistry::new(bus.clone());
        let (watcher, mut rx) = bus.register().await;
        bus.subscribe(Topic::Presence, watcher).await.unwrap();

        let (stranger, _rx) = bus.register().await;
        presence.leave(stranger).await;
        assert!(rx.try_recv().is_err());
    }
}
