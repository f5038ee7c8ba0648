use crate::types::Entity;

/// The two consumers sharing one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubProtocol {
    Chat,
    Terminal,
}

impl Entity {
    /// Which consumer an entity belongs to. Unknown tags go to chat, whose
    /// renderer skips them.
    pub fn sub_protocol(&self) -> SubProtocol {
        match self {
            Entity::Terminal(_) => SubProtocol::Terminal,
            _ => SubProtocol::Chat,
        }
    }
}
