/// Log tags, one per functional area
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogTag {
    Realtime,
    Transport,
    Queue,
    Router,
    Registry,
    Config,
    System,
}

impl LogTag {
    /// Suffix of the matching --debug-<key> flag
    pub fn to_debug_key(&self) -> &'static str {
        match self {
            LogTag::Realtime => "realtime",
            LogTag::Transport => "transport",
            LogTag::Queue => "queue",
            LogTag::Router => "router",
            LogTag::Registry => "registry",
            LogTag::Config => "config",
            LogTag::System => "system",
        }
    }

    /// Uncolored label
    pub fn to_plain_string(&self) -> String {
        self.to_debug_key().to_uppercase()
    }
}
