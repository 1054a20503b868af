use crate::node::NodeDriver;

/// Capabilities a driver type advertises to the path engine.
pub struct FactoryFlags;

impl FactoryFlags {
    /// `poll_fds` yields descriptors usable in a poll set.
    pub const SUPPORTS_POLL: u32 = 1 << 0;
    pub const SUPPORTS_READ: u32 = 1 << 1;
    pub const SUPPORTS_WRITE: u32 = 1 << 2;
    /// The driver defines its own signal list; config may not override it.
    pub const PROVIDES_SIGNALS: u32 = 1 << 3;
    /// Not addressable from user configuration.
    pub const INTERNAL: u32 = 1 << 4;
    /// Needs the HTTP collaborator started before `start`.
    pub const REQUIRES_WEB: u32 = 1 << 5;
}

pub struct NodeFactory {
    pub name: &'static str,
    pub description: &'static str,
    pub flags: u32,
    pub make: Box<dyn Fn() -> Box<dyn NodeDriver> + Send + Sync>,
}

/// Explicitly-initialized driver table.
///
/// The supervisor constructs this before any node is parsed; there is no
/// global registration order to get wrong.
pub struct NodeRegistry {
    factories: Vec<NodeFactory>,
}

impl NodeRegistry {
    pub fn empty() -> Self {
        Self {
            factories: Vec::new(),
        }
    }

    /// The built-in driver set.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();

        registry.register(NodeFactory {
            name: "file",
            description: "replay from / record to a file through a format",
            flags: FactoryFlags::SUPPORTS_READ
                | FactoryFlags::SUPPORTS_WRITE
                | FactoryFlags::SUPPORTS_POLL,
            make: Box::new(|| Box::new(crate::drivers::file::FileDriver::new())),
        });

        registry.register(NodeFactory {
            name: "signal",
            description: "synthetic waveform generator",
            flags: FactoryFlags::SUPPORTS_READ
                | FactoryFlags::SUPPORTS_POLL
                | FactoryFlags::PROVIDES_SIGNALS,
            make: Box::new(|| Box::new(crate::drivers::signal_gen::SignalDriver::new())),
        });

        registry.register(NodeFactory {
            name: "loopback",
            description: "in-process queue, writes come back as reads",
            flags: FactoryFlags::SUPPORTS_READ
                | FactoryFlags::SUPPORTS_WRITE
                | FactoryFlags::SUPPORTS_POLL,
            make: Box::new(|| Box::new(crate::drivers::loopback::LoopbackDriver::new())),
        });

        registry.register(NodeFactory {
            name: "socket",
            description: "UDP datagram endpoint through a format",
            flags: FactoryFlags::SUPPORTS_READ
                | FactoryFlags::SUPPORTS_WRITE
                | FactoryFlags::SUPPORTS_POLL,
            make: Box::new(|| Box::new(crate::drivers::socket::SocketDriver::new())),
        });

        registry
    }

    pub fn register(&mut self, factory: NodeFactory) {
        self.factories.push(factory);
    }

    pub fn lookup(&self, name: &str) -> Option<&NodeFactory> {
        self.factories.iter().find(|f| f.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeFactory> {
        self.factories.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_knows_the_core_drivers() {
        let registry = NodeRegistry::with_builtins();
        for name in ["file", "signal", "loopback", "socket"] {
            assert!(registry.lookup(name).is_some(), "missing driver '{name}'");
        }
        assert!(registry.lookup("carrier-pigeon").is_none());
    }

    #[test]
    fn signal_provides_its_own_signals() {
        let registry = NodeRegistry::with_builtins();
        let f = registry.lookup("signal").unwrap();
        assert!(f.flags & FactoryFlags::PROVIDES_SIGNALS != 0);
        assert!(f.flags & FactoryFlags::SUPPORTS_WRITE == 0);
    }
}
