//! The 16-bit packet flag bitmap (spec ss3, ss4.1). The codec never
//! interprets these bits, only preserves them; typed accessors live here so
//! callers don't juggle raw masks.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketFlags(pub u16);

impl PacketFlags {
    pub const PERSISTENT: u16 = 0x0001;
    pub const REDELIVERED: u16 = 0x0002;
    pub const IS_QUEUE: u16 = 0x0004;
    pub const SELECTORS_PROCESSED: u16 = 0x0008;
    pub const SEND_ACKNOWLEDGE: u16 = 0x0010;
    pub const IS_LAST: u16 = 0x0020;
    pub const CONSUMER_FLOW: u16 = 0x0040;
    pub const FLOW_PAUSED: u16 = 0x0080;
    pub const CONSUMER_FLOW_PAUSED: u16 = 0x0100;

    pub fn new(bits: u16) -> Self {
        PacketFlags(bits)
    }

    pub fn get(&self, flag: u16) -> bool {
        self.0 & flag != 0
    }

    pub fn set(&mut self, flag: u16, value: bool) {
        if value {
            self.0 |= flag;
        } else {
            self.0 &= !flag;
        }
    }

    pub fn persistent(&self) -> bool {
        self.get(Self::PERSISTENT)
    }
    pub fn set_persistent(&mut self, v: bool) {
        self.set(Self::PERSISTENT, v)
    }

    pub fn redelivered(&self) -> bool {
        self.get(Self::REDELIVERED)
    }
    pub fn set_redelivered(&mut self, v: bool) {
        self.set(Self::REDELIVERED, v)
    }

    pub fn is_queue(&self) -> bool {
        self.get(Self::IS_QUEUE)
    }
    pub fn set_is_queue(&mut self, v: bool) {
        self.set(Self::IS_QUEUE, v)
    }

    pub fn selectors_processed(&self) -> bool {
        self.get(Self::SELECTORS_PROCESSED)
    }
    pub fn set_selectors_processed(&mut self, v: bool) {
        self.set(Self::SELECTORS_PROCESSED, v)
    }

    pub fn send_acknowledge(&self) -> bool {
        self.get(Self::SEND_ACKNOWLEDGE)
    }
    pub fn set_send_acknowledge(&mut self, v: bool) {
        self.set(Self::SEND_ACKNOWLEDGE, v)
    }

    pub fn is_last(&self) -> bool {
        self.get(Self::IS_LAST)
    }
    pub fn set_is_last(&mut self, v: bool) {
        self.set(Self::IS_LAST, v)
    }

    pub fn consumer_flow(&self) -> bool {
        self.get(Self::CONSUMER_FLOW)
    }
    pub fn set_consumer_flow(&mut self, v: bool) {
        self.set(Self::CONSUMER_FLOW, v)
    }

    pub fn flow_paused(&self) -> bool {
        self.get(Self::FLOW_PAUSED)
    }
    pub fn set_flow_paused(&mut self, v: bool) {
        self.set(Self::FLOW_PAUSED, v)
    }

    pub fn consumer_flow_paused(&self) -> bool {
        self.get(Self::CONSUMER_FLOW_PAUSED)
    }
    pub fn set_consumer_flow_paused(&mut self, v: bool) {
        self.set(Self::CONSUMER_FLOW_PAUSED, v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_individual_bits() {
        let mut f = PacketFlags::default();
        f.set_persistent(true);
        f.set_is_last(true);
        assert!(f.persistent());
        assert!(f.is_last());
        assert!(!f.redelivered());
        f.set_persistent(false);
        assert!(!f.persistent());
        assert!(f.is_last());
    }
}
