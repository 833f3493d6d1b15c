use bitflags::bitflags;

bitflags! {
    /// Execution environments a hook or script function is valid in
    ///
    /// The world session runs in `WORLD`, every per-map session runs in `MAP`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Environment: u8 {
        const WORLD = 0b01;
        const MAP = 0b10;
        const BOTH = Self::WORLD.bits() | Self::MAP.bits();
    }
}

impl Environment {
    /// Whether something tagged with `self` may be used from a session running in `session`
    ///
    /// An empty tag places no restriction.
    pub fn allows(self, session: Environment) -> bool {
        self.is_empty() || self.intersects(session)
    }
}
