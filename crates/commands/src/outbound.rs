use {async_trait::async_trait, valet_peers::InputPeer};

/// Message operations a command may perform on the platform.
#[async_trait]
pub trait Outbound: Send + Sync {
    /// Send a text message and return its id.
    async fn send_text(
        &self,
        peer: &InputPeer,
        text: &str,
        reply_to: Option<i32>,
    ) -> anyhow::Result<i32>;

    async fn edit_text(&self, peer: &InputPeer, message_id: i32, text: &str) -> anyhow::Result<()>;

    async fn delete(&self, peer: &InputPeer, message_id: i32) -> anyhow::Result<()>;
}
