//! Session-scoped carts
//!
//! The map lock is held only for lookup; each cart has its own async mutex,
//! held across the vendor calls of a single operation, so concurrent
//! requests for one shopper serialize while different shoppers never wait
//! on each other.

use std::collections::HashMap;
use std::sync::Arc;

use agent_core::SessionId;
use tokio::sync::{Mutex, RwLock};

use crate::model::Cart;

pub type CartHandle = Arc<Mutex<Cart>>;

#[derive(Default)]
pub struct SessionCarts {
    carts: RwLock<HashMap<SessionId, CartHandle>>,
}

impl SessionCarts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cart for `session`, created empty on first use
    pub async fn handle(&self, session: &SessionId) -> CartHandle {
        if let Some(cart) = self.carts.read().await.get(session) {
            return cart.clone();
        }

        self.carts
            .write()
            .await
            .entry(session.clone())
            .or_default()
            .clone()
    }

    /// Cart for `session` if one exists; never creates
    pub async fn existing(&self, session: &SessionId) -> Option<CartHandle> {
        self.carts.read().await.get(session).cloned()
    }

    /// Forget `session` when its cart is empty and no operation holds it.
    /// Callers drop their own handle first.
    pub async fn release(&self, session: &SessionId) -> bool {
        let mut carts = self.carts.write().await;
        let idle = carts.get(session).is_some_and(|cart| {
            Arc::strong_count(cart) == 1
                && cart
                    .try_lock()
                    .is_ok_and(|c| c.is_empty() && c.checkout.is_none())
        });
        if idle {
            carts.remove(session);
        }
        idle
    }

    pub async fn len(&self) -> usize {
        self.carts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.carts.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CartItem;

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let carts = SessionCarts::new();
        let alice = SessionId::from_string("alice");
        let bob = SessionId::from_string("bob");

        carts
            .handle(&alice)
            .await
            .lock()
            .await
            .items
            .push(CartItem::new("prod_tee", 1, None));

        assert_eq!(carts.handle(&alice).await.lock().await.items.len(), 1);
        assert!(carts.handle(&bob).await.lock().await.items.is_empty());
        assert_eq!(carts.len().await, 2);
    }

    #[tokio::test]
    async fn test_release_drops_only_idle_empty_carts() {
        let carts = SessionCarts::new();
        let alice = SessionId::from_string("alice");

        let held = carts.handle(&alice).await;
        assert!(!carts.release(&alice).await);

        held.lock().await.items.push(CartItem::new("prod_tee", 1, None));
        drop(held);
        assert!(!carts.release(&alice).await);

        carts.handle(&alice).await.lock().await.clear();
        assert!(carts.release(&alice).await);
        assert!(carts.is_empty().await);
    }

    #[tokio::test]
    async fn test_existing_does_not_create() {
        let carts = SessionCarts::new();
        assert!(carts.existing(&SessionId::anonymous()).await.is_none());
        assert!(carts.is_empty().await);
    }
}
