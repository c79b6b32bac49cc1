//! Bus de notificaciones en tiempo real
//!
//! Publicación por tópicos (`module:<Módulo>`, `record:<id>` y `presence`) hacia las
//! conexiones WebSocket. Cada suscriptor tiene su propia cola acotada: un
//! cliente lento o desconectado se da de baja en vez de frenar a los demás
//! o a quien publica. La entrega es de mejor esfuerzo; si se pierde un
//! evento, el cliente se resincroniza releyendo la lista de su módulo.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::tramite::Module;

/// Capacidad por defecto de la cola de cada suscriptor
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Module(Module),
    Record(i64),
    /// Usuarios conectados
    Presence,
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Module(module) => write!(f, "module:{}", module),
            Topic::Record(id) => write!(f, "record:{}", id),
            Topic::Presence => f.write_str("presence"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Created => "created",
            ChangeKind::Updated => "updated",
            ChangeKind::Deleted => "deleted",
        }
    }
}

/// Tipo de evento `<módulo>_<cambio>`, por ejemplo `tracker_created`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventType {
    pub module: Module,
    pub kind: ChangeKind,
}

impl EventType {
    pub fn new(module: Module, kind: ChangeKind) -> Self {
        Self { module, kind }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.module.slug(), self.kind.as_str())
    }
}

/// Mensaje que recibe el cliente
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    fn new() -> Self {
        SubscriberId(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Error)]
pub enum NotificationDeliveryError {
    #[error("el suscriptor {0} no vacía su cola")]
    Lagging(SubscriberId),

    #[error("el suscriptor {0} ya no está conectado")]
    Gone(SubscriberId),

    #[error("suscriptor desconocido: {0}")]
    UnknownSubscriber(SubscriberId),
}

/// Destino de las publicaciones que hacen los motores después de confirmar
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, topic: &Topic, event_type: EventType, payload: Value);
}

#[derive(Default)]
struct Registry {
    senders: HashMap<SubscriberId, mpsc::Sender<Arc<EventEnvelope>>>,
    topics: HashMap<Topic, Vec<SubscriberId>>,
}

impl Registry {
    fn remove(&mut self, id: SubscriberId) {
        self.senders.remove(&id);
        self.topics.retain(|_, subscribers| {
            subscribers.retain(|s| *s != id);
            !subscribers.is_empty()
        });
    }
}

#[derive(Clone)]
pub struct NotificationBus {
    registry: Arc<RwLock<Registry>>,
    capacity: usize,
}

impl NotificationBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            registry: Arc::new(RwLock::new(Registry::default())),
            capacity: capacity.max(1),
        }
    }

    /// Registra una conexión y devuelve el extremo de lectura de su cola
    pub async fn register(&self) -> (SubscriberId, mpsc::Receiver<Arc<EventEnvelope>>) {
        let id = SubscriberId::new();
        let (tx, rx) = mpsc::channel(self.capacity);
        self.registry.write().await.senders.insert(id, tx);
        debug!("🔌 Suscriptor {} registrado", id);
        (id, rx)
    }

    pub async fn subscribe(
        &self,
        topic: Topic,
        id: SubscriberId,
    ) -> Result<(), NotificationDeliveryError> {
        let mut registry = self.registry.write().await;
        if !registry.senders.contains_key(&id) {
            return Err(NotificationDeliveryError::UnknownSubscriber(id));
        }
        let subscribers = registry.topics.entry(topic).or_default();
        if !subscribers.contains(&id) {
            subscribers.push(id);
        }
        debug!("📡 {} suscrito a {}", id, topic);
        Ok(())
    }

    pub async fn unsubscribe(&self, topic: Topic, id: SubscriberId) {
        let mut registry = self.registry.write().await;
        if let Some(subscribers) = registry.topics.get_mut(&topic) {
            subscribers.retain(|s| *s != id);
            if subscribers.is_empty() {
                registry.topics.remove(&topic);
            }
        }
    }

    /// Quita la conexión de todos sus tópicos; se llama al desconectar
    pub async fn unsubscribe_all(&self, id: SubscriberId) {
        self.registry.write().await.remove(id);
        debug!("🔌 Suscriptor {} dado de baja", id);
    }

    pub async fn subscriber_count(&self, topic: Topic) -> usize {
        self.registry
            .read()
            .await
            .topics
            .get(&topic)
            .map_or(0, Vec::len)
    }

    /// Entrega el evento a cada suscriptor del tópico sin esperar a ninguno.
    /// Devuelve cuántos lo recibieron.
    pub async fn broadcast(
        &self,
        topic: &Topic,
        event_type: impl fmt::Display,
        payload: Value,
    ) -> usize {
        let envelope = Arc::new(EventEnvelope {
            event_type: event_type.to_string(),
            data: payload,
            timestamp: Utc::now(),
        });

        let mut failed = Vec::new();
        let mut delivered = 0;
        {
            let registry = self.registry.read().await;
            let Some(subscribers) = registry.topics.get(topic) else {
                return 0;
            };
            for id in subscribers {
                let Some(sender) = registry.senders.get(id) else {
                    continue;
                };
                match sender.try_send(Arc::clone(&envelope)) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        failed.push(NotificationDeliveryError::Lagging(*id))
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        failed.push(NotificationDeliveryError::Gone(*id))
                    }
                }
            }
        }

        if !failed.is_empty() {
            let mut registry = self.registry.write().await;
            for error in failed {
                warn!("⚠️ Evento {} en {} no entregado: {}", event_type, topic, error);
                if let NotificationDeliveryError::Lagging(id) | NotificationDeliveryError::Gone(id) =
                    error
                {
                    registry.remove(id);
                }
            }
        }

        debug!("📤 {} en {} entregado a {} suscriptores", event_type, topic, delivered);
        delivered
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

#[async_trait]
impl Notifier for NotificationBus {
    async fn publish(&self, topic: &Topic, event_type: EventType, payload: Value) {
        self.broadcast(topic, event_type, payload).await;
    }
}
