use crate::value::Kind;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Metadata about a register address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub struct RegisterInfo<'a> {
    pub address: u16,
    pub name: &'a str,
    pub description: &'a str,
    /// The layout the device documents for this address.
    pub kind: Kind,
}

impl RegisterInfo<'_> {
    pub fn is_match(&self, pattern: &str) -> bool {
        let pattern = pattern.to_uppercase();
        self.name.to_uppercase().contains(&pattern)
            || self.description.to_uppercase().contains(&pattern)
            || self.address.to_string().contains(&pattern)
    }
}

/// Address to metadata lookup consulted before every read.
///
/// Implementations are read-only and may be shared between any number of clients.
pub trait Registry {
    fn lookup(&self, address: u16) -> Option<RegisterInfo<'_>>;

    /// All known registers, ordered by address.
    fn entries(&self) -> Vec<RegisterInfo<'_>>;

    fn find_by_name(&self, name: &str) -> Option<RegisterInfo<'_>> {
        self.entries().into_iter().find(|e| e.name.eq_ignore_ascii_case(name))
    }
}

impl<R: Registry + ?Sized> Registry for &R {
    fn lookup(&self, address: u16) -> Option<RegisterInfo<'_>> {
        (**self).lookup(address)
    }
    fn entries(&self) -> Vec<RegisterInfo<'_>> {
        (**self).entries()
    }
}

impl<R: Registry + ?Sized> Registry for Arc<R> {
    fn lookup(&self, address: u16) -> Option<RegisterInfo<'_>> {
        (**self).lookup(address)
    }
    fn entries(&self) -> Vec<RegisterInfo<'_>> {
        (**self).entries()
    }
}

/// Built-in SunSpec register map.
///
/// Covers the common block (model 1) at 40001, followed by the three phase float inverter
/// block (model 113), the measurement status block (model 122) and the basic storage control
/// block (model 124) at the addresses most inverters place them.
#[derive(Clone, Copy, Debug, Default)]
pub struct SunSpecRegistry;

impl Registry for SunSpecRegistry {
    fn lookup(&self, address: u16) -> Option<RegisterInfo<'_>> {
        RegisterIndex::from_address(address).map(RegisterIndex::info)
    }

    fn entries(&self) -> Vec<RegisterInfo<'_>> {
        (0..ADDRESSES.len()).map(|i| RegisterIndex(i).info()).collect()
    }
}

#[derive(Clone, Copy)]
pub struct RegisterIndex(usize);

impl RegisterIndex {
    pub fn from_address(address: u16) -> Option<RegisterIndex> {
        let index = ADDRESSES.partition_point(|v| *v < address);
        (ADDRESSES.get(index) == Some(&address)).then_some(Self(index))
    }

    pub fn address(&self) -> u16 {
        ADDRESSES[self.0]
    }

    pub fn name(&self) -> &'static str {
        NAMES[self.0]
    }

    pub fn kind(&self) -> Kind {
        KINDS[self.0]
    }

    pub fn info(self) -> RegisterInfo<'static> {
        RegisterInfo {
            address: self.address(),
            name: self.name(),
            description: DESCRIPTIONS[self.0],
            kind: self.kind(),
        }
    }
}

macro_rules! for_each_register {
    ($m:ident) => {
        $m! {
            40001: Uint32, "SID", "Well-known value 0x53756e53 identifying a SunSpec map";
            40003: Uint16, "C_ID", "Common model identifier, always 1";
            40004: Uint16, "C_L", "Common model length in registers";
            40005: String32, "Mn", "Manufacturer";
            40021: String32, "Md", "Device model";
            40037: String16, "Opt", "Options";
            40045: String16, "Vr", "Firmware version";
            40053: String32, "SN", "Serial number";
            40069: Uint16, "DA", "Modbus device address";
            40070: Uint16, "I_ID", "Inverter model identifier (111, 112 or 113)";
            40071: Uint16, "I_L", "Inverter model length in registers";
            40072: Float32, "A", "AC current, all phases (A)";
            40074: Float32, "AphA", "AC current, phase A (A)";
            40076: Float32, "AphB", "AC current, phase B (A)";
            40078: Float32, "AphC", "AC current, phase C (A)";
            40080: Float32, "PPVphAB", "AC voltage, phase AB (V)";
            40082: Float32, "PPVphBC", "AC voltage, phase BC (V)";
            40084: Float32, "PPVphCA", "AC voltage, phase CA (V)";
            40086: Float32, "PhVphA", "AC voltage, phase A to neutral (V)";
            40088: Float32, "PhVphB", "AC voltage, phase B to neutral (V)";
            40090: Float32, "PhVphC", "AC voltage, phase C to neutral (V)";
            40092: Float32, "W", "AC power (W)";
            40094: Float32, "Hz", "Line frequency (Hz)";
            40096: Float32, "VA", "AC apparent power (VA)";
            40098: Float32, "VAr", "AC reactive power (var)";
            40100: Float32, "PF", "Power factor (%)";
            40102: Float32, "WH", "AC lifetime energy production (Wh)";
            40104: Float32, "DCA", "DC current (A)";
            40106: Float32, "DCV", "DC voltage (V)";
            40108: Float32, "DCW", "DC power (W)";
            40110: Float32, "TmpCab", "Cabinet temperature (C)";
            40112: Float32, "TmpSnk", "Heat sink temperature (C)";
            40114: Float32, "TmpTrns", "Transformer temperature (C)";
            40116: Float32, "TmpOt", "Other temperature (C)";
            40118: Uint16, "St", "Operating state. 1=Off, 2=Sleeping, 3=Starting, 4=MPPT, 5=Throttled, 6=Shutting down, 7=Fault, 8=Standby";
            40119: Uint16, "StVnd", "Vendor specific operating state";
            40120: Uint32, "Evt1", "Event flags (bits 0-31)";
            40122: Uint32, "Evt2", "Event flags, reserved for future use";
            40124: Uint32, "EvtVnd1", "Vendor defined event flags (bits 0-31)";
            40126: Uint32, "EvtVnd2", "Vendor defined event flags (bits 32-63)";
            40128: Uint32, "EvtVnd3", "Vendor defined event flags (bits 64-95)";
            40130: Uint32, "EvtVnd4", "Vendor defined event flags (bits 96-127)";
            40192: Uint16, "MS_ID", "Measurement status model identifier, always 122";
            40193: Uint16, "MS_L", "Measurement status model length in registers";
            40194: Uint16, "PVConn", "PV inverter connection status bitmask. Bit 0=Connected, 1=Available, 2=Operating, 3=Test";
            40195: Uint16, "StorConn", "Storage connection status bitmask. Bit 0=Connected, 1=Available, 2=Operating, 3=Test";
            40196: Uint16, "ECPConn", "Electric connection point connection status. 1=Connected";
            40197: Uint64, "ActWh", "AC lifetime active (real) energy output (Wh)";
            40201: Uint64, "ActVAh", "AC lifetime apparent energy output (VAh)";
            40205: Uint64, "ActVArhQ1", "AC lifetime reactive energy output in quadrant 1 (varh)";
            40209: Uint64, "ActVArhQ2", "AC lifetime reactive energy output in quadrant 2 (varh)";
            40213: Uint64, "ActVArhQ3", "AC lifetime negative energy output in quadrant 3 (varh)";
            40217: Uint64, "ActVArhQ4", "AC lifetime reactive energy output in quadrant 4 (varh)";
            40221: Uint16, "VArAval", "Amount of VARs available without impacting watts output (var)";
            40222: Int16, "VArAval_SF", "Scale factor for available VARs";
            40223: Uint16, "WAval", "Amount of watts available (W)";
            40224: Int16, "WAval_SF", "Scale factor for available watts";
            40225: Uint32, "StSetLimMsk", "Bit mask indicating setpoint limit(s) reached";
            40227: Uint32, "StActCtl", "Bit mask indicating which inverter controls are currently active";
            40233: Uint32, "Tms", "Seconds since 01-01-2000 00:00 UTC";
            40235: Uint16, "RtSt", "Bit mask indicating active ride-through status";
            40236: Uint16, "Ris", "Isolation resistance (ohm)";
            40237: Int16, "Ris_SF", "Scale factor for isolation resistance";
            40314: Uint16, "S_ID", "Basic storage control model identifier, always 124";
            40315: Uint16, "S_L", "Basic storage control model length in registers";
            40316: Uint16, "WChaMax", "Setpoint for maximum charge (W)";
            40317: Uint16, "WChaGra", "Setpoint for maximum charging rate (% WChaMax/sec)";
            40318: Uint16, "WDisChaGra", "Setpoint for maximum discharge rate (% WChaMax/sec)";
            40319: Uint16, "StorCtl_Mod", "Active hold/discharge/charge storage control mode bitmask. Bit 0=Charge, 1=Discharge";
            40320: Uint16, "VAChaMax", "Setpoint for maximum charging VA (VA)";
            40321: Uint16, "MinRsvPct", "Setpoint for minimum reserve for storage as a percentage of the nominal maximum storage (% WChaMax)";
            40322: Uint16, "ChaState", "Currently available energy as a percent of the capacity rating (% AhrRtg)";
            40323: Uint16, "StorAval", "State of charge minus storage reserve percentage times capacity rating (AH)";
            40324: Uint16, "InBatV", "Internal battery voltage (V)";
            40325: Uint16, "ChaSt", "Charge status of storage device. 1=Off, 2=Empty, 3=Discharging, 4=Charging, 5=Full, 6=Holding, 7=Testing";
            40326: Int16, "OutWRte", "Percent of max discharge rate (% WDisChaMax)";
            40327: Int16, "InWRte", "Percent of max charging rate (% WChaMax)";
            40328: Uint16, "InOutWRte_WinTms", "Time window for charge/discharge rate change (Secs)";
            40329: Uint16, "InOutWRte_RvrtTms", "Timeout period for charge/discharge rate (Secs)";
            40330: Uint16, "InOutWRte_RmpTms", "Ramp time for moving from current setpoint to new setpoint (Secs)";
            40331: Uint16, "ChaGriSet", "Whether charging from the grid is allowed. 0=PV, 1=Grid";
            40332: Int16, "WChaMax_SF", "Scale factor for maximum charge";
            40333: Int16, "WChaDisChaGra_SF", "Scale factor for maximum charge and discharge rate";
            40334: Int16, "VAChaMax_SF", "Scale factor for maximum charging VA";
            40335: Int16, "MinRsvPct_SF", "Scale factor for minimum reserve percentage";
            40336: Int16, "ChaState_SF", "Scale factor for available energy percent";
            40337: Int16, "StorAval_SF", "Scale factor for state of charge";
            40338: Int16, "InBatV_SF", "Scale factor for battery voltage";
            40339: Int16, "InOutWRte_SF", "Scale factor for percent charge/discharge rate";
        }
    };
}

macro_rules! make_lists {
    ($($regnum: literal: $kind: ident, $name: literal, $description: literal;)+) => {
        pub static ADDRESSES: &[u16] = &[$($regnum),*];
        pub static NAMES: &[&str] = &[$($name),*];
        pub static KINDS: &[Kind] = &[$(Kind::$kind),*];
        pub static DESCRIPTIONS: &[&str] = &[$($description),*];
    };
}

for_each_register!(make_lists);

const _ASSERT_NO_OVERLAPS: () = const {
    let mut index = 1;
    while index < ADDRESSES.len() {
        let previous_end = ADDRESSES[index - 1] as u32 + KINDS[index - 1].words() as u32;
        if ADDRESSES[index] as u32 <= ADDRESSES[index - 1] as u32 {
            panic!("ADDRESSES is not sorted (or has duplicate values)!");
        }
        if (ADDRESSES[index] as u32) < previous_end {
            panic!("a register overlaps the words of the register before it!");
        }
        index += 1;
    }
};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not read the register table at {1:?}")]
    Read(#[source] std::io::Error, PathBuf),
    #[error("could not parse the register table at {1:?}")]
    Parse(#[source] serde_json::Error, PathBuf),
    #[error("register {0} is listed more than once")]
    Duplicate(u16),
}

#[derive(Clone, Debug, PartialEq, serde::Deserialize)]
struct TableEntry {
    address: u16,
    name: String,
    #[serde(default)]
    description: String,
    kind: Kind,
}

/// A register table supplied by the user, e.g. for vendor specific blocks.
///
/// The JSON format is a list of `{"address", "name", "description", "kind"}` objects.
#[derive(Clone, Debug, Default)]
pub struct TableRegistry {
    entries: BTreeMap<u16, TableEntry>,
}

impl TableRegistry {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let list = serde_json::from_str::<Vec<TableEntry>>(json)?;
        Self::from_entries(list).map_err(|address| {
            <serde_json::Error as serde::de::Error>::custom(Error::Duplicate(address))
        })
    }

    pub fn from_path(path: &Path) -> Result<Self, Error> {
        let json =
            std::fs::read_to_string(path).map_err(|e| Error::Read(e, path.to_path_buf()))?;
        let list = serde_json::from_str::<Vec<TableEntry>>(&json)
            .map_err(|e| Error::Parse(e, path.to_path_buf()))?;
        Self::from_entries(list).map_err(Error::Duplicate)
    }

    /// Fails with the first duplicated address.
    fn from_entries(list: Vec<TableEntry>) -> Result<Self, u16> {
        let mut entries = BTreeMap::new();
        for entry in list {
            let address = entry.address;
            if entries.insert(address, entry).is_some() {
                return Err(address);
            }
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Registry for TableRegistry {
    fn lookup(&self, address: u16) -> Option<RegisterInfo<'_>> {
        self.entries.get(&address).map(|e| RegisterInfo {
            address: e.address,
            name: &e.name,
            description: &e.description,
            kind: e.kind,
        })
    }

    fn entries(&self) -> Vec<RegisterInfo<'_>> {
        self.entries.keys().filter_map(|&a| self.lookup(a)).collect()
    }
}

/// Consults `over` first and falls back to `under`.
#[derive(Clone, Debug, Default)]
pub struct Layered<A, B> {
    pub over: A,
    pub under: B,
}

impl<A: Registry, B: Registry> Registry for Layered<A, B> {
    fn lookup(&self, address: u16) -> Option<RegisterInfo<'_>> {
        self.over.lookup(address).or_else(|| self.under.lookup(address))
    }

    fn entries(&self) -> Vec<RegisterInfo<'_>> {
        let mut merged = BTreeMap::new();
        for entry in self.under.entries().into_iter().chain(self.over.entries()) {
            merged.insert(entry.address, entry);
        }
        merged.into_values().collect()
    }
}
