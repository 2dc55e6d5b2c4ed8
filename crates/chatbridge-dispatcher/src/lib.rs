//! Single-consumer dispatcher: a bounded FIFO queue of forwardables,
//! each routed to the handler registered for its destination address.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::sync::Arc;

use chatbridge_core::{ChatAddress, ChatHandler, Forwardable};
use chatbridge_storage::ChatStore;
use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, warn};

/// Overflow on the forwardable queue blocks the producer —
/// backpressure rather than drop-newest or drop-oldest.
pub const QUEUE_CAPACITY: usize = 100;

/// Holds `address -> handler` and the bounded forwardable queue.
/// `start()` runs forever, dequeuing and variant-dispatching; every
/// variant except `Unbridge` is dispatched as a fire-and-forget task
/// so a slow network call on one destination cannot stall delivery to
/// another.
pub struct MessageDispatcher {
    handlers: DashMap<ChatAddress, Arc<dyn ChatHandler>>,
    sender: mpsc::Sender<Forwardable>,
    receiver: Mutex<mpsc::Receiver<Forwardable>>,
    chats: ChatStore,
}

impl MessageDispatcher {
    pub fn new(chats: ChatStore) -> Self {
        let (sender, receiver) = mpsc::channel(QUEUE_CAPACITY);
        Self {
            handlers: DashMap::new(),
            sender,
            receiver: Mutex::new(receiver),
            chats,
        }
    }

    /// A cloneable handle to enqueue forwardables without holding a
    /// reference to the dispatcher itself.
    pub fn sender(&self) -> DispatcherSender {
        DispatcherSender {
            sender: self.sender.clone(),
        }
    }

    /// Registers the handler for a confirmed pairing's address. Called
    /// by each network's `ChatHandlerFactory::create_handler`.
    pub fn register(&self, address: ChatAddress, handler: Arc<dyn ChatHandler>) {
        self.handlers.insert(address, handler);
    }

    /// Enqueues a forwardable, suspending the caller if the queue is
    /// full (capacity 100).
    pub async fn enqueue(&self, forwardable: Forwardable) {
        if self.sender.send(forwardable).await.is_err() {
            error!("dispatcher queue closed, dropping forwardable");
        }
    }

    /// Runs forever: dequeue, look up the handler, variant-dispatch.
    pub async fn start(&self) {
        let mut receiver = self.receiver.lock().await;
        while let Some(forwardable) = receiver.recv().await {
            self.dispatch(forwardable).await;
        }
    }

    async fn dispatch(&self, forwardable: Forwardable) {
        let address = forwardable.chat().address.clone();

        let Some(handler) = self.handlers.get(&address).map(|entry| entry.clone()) else {
            warn!(%address, "no handler registered for destination, dropping forwardable");
            return;
        };

        match forwardable {
            Forwardable::Attachment(attachment) => {
                tokio::spawn(async move { handler.send_attachment(&attachment).await });
            }
            Forwardable::Sticker(sticker) => {
                tokio::spawn(async move { handler.send_sticker(&sticker).await });
            }
            Forwardable::Message(message) if message.edit => {
                tokio::spawn(async move { handler.edit_message(&message).await });
            }
            Forwardable::Message(message) => {
                tokio::spawn(async move { handler.send_message(&message).await });
            }
            Forwardable::Event(event) => {
                tokio::spawn(async move { handler.send_event(&event).await });
            }
            Forwardable::Unbridge(_) => {
                // Awaited inline: the handler-map cleanup below must not
                // race a concurrent event for the same chat.
                handler.unbridge().await;
                self.teardown_pairing(&address).await;
            }
        }
    }

    async fn teardown_pairing(&self, address: &ChatAddress) {
        match self.chats.pair_for(address.as_str()).await {
            Ok(Some((tg_chat_id, xp_room))) => {
                self.handlers.remove(&ChatAddress::from(tg_chat_id));
                self.handlers.remove(&ChatAddress::from(xp_room));
                if let Err(error) = self.chats.remove(tg_chat_id).await {
                    error!(%error, "failed to delete unbridged pairing");
                }
            }
            Ok(None) => {
                // Already torn down or never persisted; still drop the
                // handler for the address we do know about.
                self.handlers.remove(address);
            }
            Err(error) => {
                error!(%error, %address, "failed to look up pairing for unbridge");
                self.handlers.remove(address);
            }
        }
    }
}

/// A cheaply-cloneable producer handle for the dispatcher's queue.
#[derive(Clone)]
pub struct DispatcherSender {
    sender: mpsc::Sender<Forwardable>,
}

impl DispatcherSender {
    pub async fn enqueue(&self, forwardable: Forwardable) {
        if self.sender.send(forwardable).await.is_err() {
            error!("dispatcher queue closed, dropping forwardable");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chatbridge_core::{Chat, Event, Message, Sender};
    use sqlx::SqlitePool;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingHandler {
        messages: AtomicUsize,
        edits: AtomicUsize,
        events: AtomicUsize,
        unbridges: AtomicUsize,
    }

    #[async_trait]
    impl ChatHandler for RecordingHandler {
        async fn send_message(&self, _message: &Message) {
            self.messages.fetch_add(1, Ordering::SeqCst);
        }

        async fn send_attachment(&self, _attachment: &chatbridge_core::Attachment) {}

        async fn edit_message(&self, _message: &Message) {
            self.edits.fetch_add(1, Ordering::SeqCst);
        }

        async fn send_event(&self, _event: &Event) {
            self.events.fetch_add(1, Ordering::SeqCst);
        }

        async fn unbridge(&self) {
            self.unbridges.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn chats() -> ChatStore {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let store = ChatStore::new(pool);
        store.create().await.unwrap();
        store
    }

    fn message(address: &str, content: &str, edit: bool) -> Message {
        Message {
            id: "1".into(),
            chat: Chat::new(address),
            sender: Sender::new("Al", "1"),
            content: content.into(),
            reply: None,
            edit,
        }
    }

    #[tokio::test]
    async fn drops_forwardable_with_no_registered_handler() {
        let dispatcher = MessageDispatcher::new(chats().await);
        dispatcher
            .enqueue(Forwardable::Message(message("nowhere", "hi", false)))
            .await;
        // No handler registered; start() must not panic when it drains this.
        let dispatcher = Arc::new(dispatcher);
        let handle = dispatcher.clone();
        let task = tokio::spawn(async move { handle.start().await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        task.abort();
    }

    #[tokio::test]
    async fn routes_message_to_registered_handler() {
        let dispatcher = Arc::new(MessageDispatcher::new(chats().await));
        let handler = Arc::new(RecordingHandler::default());
        dispatcher.register(ChatAddress::from("room@conf.example.org"), handler.clone());

        let handle = dispatcher.clone();
        let task = tokio::spawn(async move { handle.start().await });

        dispatcher
            .enqueue(Forwardable::Message(message(
                "room@conf.example.org",
                "hi",
                false,
            )))
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        task.abort();

        assert_eq!(handler.messages.load(Ordering::SeqCst), 1);
        assert_eq!(handler.edits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn edit_flag_routes_to_edit_message() {
        let dispatcher = Arc::new(MessageDispatcher::new(chats().await));
        let handler = Arc::new(RecordingHandler::default());
        dispatcher.register(ChatAddress::from("room@conf.example.org"), handler.clone());

        let handle = dispatcher.clone();
        let task = tokio::spawn(async move { handle.start().await });

        dispatcher
            .enqueue(Forwardable::Message(message(
                "room@conf.example.org",
                "hi2",
                true,
            )))
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        task.abort();

        assert_eq!(handler.edits.load(Ordering::SeqCst), 1);
        assert_eq!(handler.messages.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unbridge_removes_both_directions_and_deletes_pairing() {
        let chats = chats().await;
        chats.add(-100123, "room@conf.example.org").await.unwrap();

        let dispatcher = Arc::new(MessageDispatcher::new(chats.clone()));
        let tg_handler = Arc::new(RecordingHandler::default());
        let xp_handler = Arc::new(RecordingHandler::default());
        dispatcher.register(ChatAddress::from(-100123), tg_handler.clone());
        dispatcher.register(
            ChatAddress::from("room@conf.example.org"),
            xp_handler.clone(),
        );

        let handle = dispatcher.clone();
        let task = tokio::spawn(async move { handle.start().await });

        dispatcher
            .enqueue(Forwardable::Unbridge(Chat::new(-100123)))
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        task.abort();

        assert_eq!(tg_handler.unbridges.load(Ordering::SeqCst), 1);
        assert!(chats.all().await.unwrap().is_empty());

        // Both directions gone: a follow-up message to either address finds no handler.
        let dispatcher2 = Arc::new(MessageDispatcher::new(chats));
        let handle2 = dispatcher2.clone();
        let task2 = tokio::spawn(async move { handle2.start().await });
        dispatcher2
            .enqueue(Forwardable::Message(message(
                "room@conf.example.org",
                "late",
                false,
            )))
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        task2.abort();
    }
}
