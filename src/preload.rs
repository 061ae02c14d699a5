//! Fixed reference data seeded into empty constant tables.
//!
//! `text` is the stored display spelling, `eddn` the journal/network spelling when it differs.

use crate::lookup::ConstantKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Seed {
    pub id: i64,
    pub text: &'static str,
    pub eddn: Option<&'static str>,
    pub planetary: bool,
}

const fn seed(id: i64, text: &'static str) -> Seed {
    Seed {
        id,
        text,
        eddn: None,
        planetary: false,
    }
}

const fn spelled(id: i64, text: &'static str, eddn: &'static str) -> Seed {
    Seed {
        id,
        text,
        eddn: Some(eddn),
        planetary: false,
    }
}

const fn planetary(id: i64, text: &'static str, eddn: Option<&'static str>) -> Seed {
    Seed {
        id,
        text,
        eddn,
        planetary: true,
    }
}

pub const ALLEGIANCES: &[Seed] = &[
    seed(1, "Alliance"),
    seed(2, "Empire"),
    seed(3, "Federation"),
    seed(4, "Independent"),
    seed(5, "None"),
    spelled(7, "Pilots Federation", "PilotsFederation"),
    seed(8, "Thargoid"),
    seed(9, "Guardian"),
];

pub const POWERS: &[Seed] = &[
    seed(0, "None"),
    seed(1, "Aisling Duval"),
    seed(2, "Archon Delaine"),
    spelled(3, "Arissa Lavigny-Duval", "A. Lavigny-Duval"),
    seed(4, "Denton Patreus"),
    seed(5, "Edmund Mahon"),
    seed(6, "Felicia Winters"),
    seed(7, "Li Yong-Rui"),
    seed(8, "Pranav Antal"),
    seed(9, "Zachary Hudson"),
    seed(10, "Zemina Torval"),
    seed(11, "Yuri Grom"),
];

pub const POWER_STATES: &[Seed] = &[
    seed(0, "None"),
    spelled(16, "Control", "Controlled"),
    seed(32, "Exploited"),
    seed(48, "Contested"),
    seed(64, "Expansion"),
    seed(80, "Prepared"),
    seed(96, "HomeSystem"),
];

pub const ECONOMIES: &[Seed] = &[
    spelled(1, "Agriculture", "Agri"),
    seed(2, "Extraction"),
    spelled(3, "High Tech", "HighTech"),
    seed(4, "Industrial"),
    seed(5, "Military"),
    seed(6, "Refinery"),
    seed(7, "Service"),
    seed(8, "Terraforming"),
    seed(9, "Tourism"),
    seed(10, "None"),
    seed(11, "Colony"),
    spelled(12, "Private Enterprise", "PrivateEnterprise"),
    seed(13, "Rescue"),
    seed(14, "Prison"),
    seed(15, "Carrier"),
    seed(16, "Damaged"),
    seed(17, "Repair"),
];

pub const SECURITIES: &[Seed] = &[
    seed(16, "Low"),
    seed(32, "Medium"),
    seed(48, "High"),
    seed(64, "Anarchy"),
    seed(80, "Lawless"),
];

pub const FACTION_STATES: &[Seed] = &[
    seed(0, "(unknown)"),
    seed(16, "Boom"),
    seed(32, "Bust"),
    seed(37, "Famine"),
    spelled(48, "Civil Unrest", "CivilUnrest"),
    spelled(64, "Civil War", "CivilWar"),
    seed(65, "Election"),
    spelled(66, "Civil Liberty", "CivilLiberty"),
    seed(67, "Expansion"),
    seed(69, "Lockdown"),
    seed(72, "Outbreak"),
    seed(73, "War"),
    seed(80, "None"),
    spelled(81, "Pirate Attack", "PirateAttack"),
    seed(96, "Retreat"),
    seed(101, "Investment"),
    seed(102, "Blight"),
    seed(103, "Drought"),
    spelled(104, "Infrastructure Failure", "InfrastructureFailure"),
    spelled(105, "Natural Disaster", "NaturalDisaster"),
    spelled(106, "Public Holiday", "PublicHoliday"),
    spelled(107, "Terrorist Attack", "Terrorism"),
];

pub const GOVERNMENTS: &[Seed] = &[
    seed(0, "(unknown)"),
    seed(16, "Anarchy"),
    seed(32, "Communism"),
    seed(48, "Confederacy"),
    seed(64, "Corporate"),
    seed(80, "Cooperative"),
    seed(96, "Democracy"),
    seed(112, "Dictatorship"),
    seed(128, "Feudal"),
    seed(133, "Imperial"),
    seed(144, "Patronage"),
    spelled(150, "Prison Colony", "PrisonColony"),
    seed(160, "Theocracy"),
    seed(176, "None"),
    seed(192, "Engineer"),
    seed(208, "Prison"),
    spelled(209, "Private Ownership", "PrivateOwnership"),
    seed(300, "Carrier"),
];

pub const STATION_TYPES: &[Seed] = &[
    spelled(1, "Civilian Outpost", "Outpost"),
    seed(2, "Commercial Outpost"),
    spelled(3, "Coriolis Starport", "Coriolis"),
    seed(4, "Industrial Outpost"),
    seed(5, "Military Outpost"),
    seed(6, "Mining Outpost"),
    spelled(7, "Ocellus Starport", "Ocellus"),
    spelled(8, "Orbis Starport", "Orbis"),
    seed(9, "Scientific Outpost"),
    seed(10, "Unsanctioned Outpost"),
    seed(11, "Unknown Outpost"),
    seed(12, "Unknown Starport"),
    planetary(13, "Planetary Outpost", Some("CraterOutpost")),
    planetary(14, "Planetary Port", Some("CraterPort")),
    planetary(15, "Unknown Planetary", None),
    planetary(16, "Planetary Settlement", None),
    planetary(17, "Planetary Engineer Base", None),
    spelled(19, "Megaship", "MegaShip"),
    spelled(20, "Asteroid Base", "AsteroidBase"),
    seed(22, "Unknown Dockable"),
    seed(23, "Non-Dockable Orbital"),
    spelled(24, "Fleet Carrier", "FleetCarrier"),
    planetary(25, "Odyssey Settlement", Some("OdysseySettlement")),
];

/// Alphabetical, ids from 1.
pub const SHIPS: &[Seed] = &[
    seed(1, "Adder"),
    seed(2, "Alliance Challenger"),
    seed(3, "Alliance Chieftain"),
    seed(4, "Alliance Crusader"),
    seed(5, "Anaconda"),
    seed(6, "Asp Explorer"),
    seed(7, "Asp Scout"),
    seed(8, "Beluga Liner"),
    seed(9, "Cobra MkIII"),
    seed(10, "Cobra MkIV"),
    seed(11, "Diamondback Explorer"),
    seed(12, "Diamondback Scout"),
    seed(13, "Dolphin"),
    seed(14, "Eagle"),
    seed(15, "Federal Assault Ship"),
    seed(16, "Federal Corvette"),
    seed(17, "Federal Dropship"),
    seed(18, "Federal Gunship"),
    seed(19, "Fer-de-Lance"),
    seed(20, "Hauler"),
    seed(21, "Imperial Clipper"),
    seed(22, "Imperial Courier"),
    seed(23, "Imperial Cutter"),
    seed(24, "Imperial Eagle"),
    seed(25, "Keelback"),
    seed(26, "Krait MkII"),
    seed(27, "Krait Phantom"),
    seed(28, "Mamba"),
    seed(29, "Orca"),
    seed(30, "Python"),
    seed(31, "Sidewinder"),
    seed(32, "Type-10 Defender"),
    seed(33, "Type-6 Transporter"),
    seed(34, "Type-7 Transporter"),
    seed(35, "Type-9 Heavy"),
    seed(36, "Viper MkIII"),
    seed(37, "Viper MkIV"),
    seed(38, "Vulture"),
];

/// Seed rows for one constant category. Groups come from the dump catalog, not from here.
pub fn seeds(kind: ConstantKind) -> &'static [Seed] {
    match kind {
        ConstantKind::Allegiance => ALLEGIANCES,
        ConstantKind::Power => POWERS,
        ConstantKind::PowerState => POWER_STATES,
        ConstantKind::Economy => ECONOMIES,
        ConstantKind::Security => SECURITIES,
        ConstantKind::FactionState => FACTION_STATES,
        ConstantKind::Government => GOVERNMENTS,
        ConstantKind::StationType => STATION_TYPES,
        ConstantKind::Ship => SHIPS,
        ConstantKind::CommodityGroup | ConstantKind::ModuleGroup => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashSet;

    #[test]
    fn ids_unique_per_kind() {
        for kind in ConstantKind::ALL {
            let rows = seeds(kind);
            let ids: FxHashSet<i64> = rows.iter().map(|s| s.id).collect();
            assert_eq!(ids.len(), rows.len(), "{kind:?}");
        }
    }

    #[test]
    fn ships_are_alphabetical() {
        let names: Vec<&str> = SHIPS.iter().map(|s| s.text).collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
        assert_eq!(SHIPS.iter().find(|s| s.text == "Sidewinder").map(|s| s.id), Some(31));
    }

    #[test]
    fn stub_defaults_exist() {
        use crate::config::{STUB_ALLEGIANCE_ID, STUB_GOVERNMENT_ID, STUB_STATE_ID};
        assert!(ALLEGIANCES.iter().any(|s| s.id == STUB_ALLEGIANCE_ID && s.text == "None"));
        assert!(GOVERNMENTS.iter().any(|s| s.id == STUB_GOVERNMENT_ID && s.text == "None"));
        assert!(FACTION_STATES.iter().any(|s| s.id == STUB_STATE_ID && s.text == "None"));
    }
}
