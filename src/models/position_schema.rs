//! Fixed layout of the route-sheet table.
//!
//! The extractor reports every cell by its column slot (1-based, left to right), not by
//! header text. These tables tie each slot to its SQL column and to the header titles
//! that may legitimately be printed above it. They are compile-time constants; nothing
//! writes to them.

/// Number of column slots on a route sheet.
pub const POSITION_COUNT: u32 = 17;

/// Position → SQL column.
pub const POSITION_TO_COLUMN: [(u32, &str); 17] = [
    (1, "tournee"),
    (2, "nom_compagnie"),
    (3, "debut_tournee"),
    (4, "fin_tournee"),
    (5, "classe_vehicule"),
    (6, "id_employe"),
    (7, "nom_employe_complet"),
    (8, "id_employe_confirm"),
    (9, "vehicule"),
    (10, "classe_vehicule_affecte"),
    (11, "autorisation"),
    (12, "approuve"),
    (13, "retour"),
    (14, "adresse_debut"),
    (15, "adresse_fin"),
    (16, "changement"),
    (17, "changement_par"),
];

/// Position → header titles accepted at that slot.
///
/// Only lowercased at match time (detected headers are also stripped of accents), so
/// accented titles are listed together with their unaccented spelling.
pub const EXPECTED_HEADERS: [(u32, &[&str]); 17] = [
    (1, &["Tournée", "Tournee", "No tournée", "No tournee", "N° tournée"]),
    (2, &["Nom de la compagnie", "Nom compagnie", "Compagnie"]),
    (3, &["Début tournée", "Debut tournee", "Heure début", "Heure debut", "Début", "Debut"]),
    (4, &["Fin tournée", "Fin tournee", "Heure fin", "Fin"]),
    (5, &["Classe véhicule", "Classe vehicule", "Classe de véhicule", "Classe"]),
    (6, &["ID employé", "ID employe", "No employé", "No employe", "Matricule"]),
    (7, &["Nom employé complet", "Nom employe complet", "Nom de l'employé", "Nom de l'employe", "Nom complet"]),
    (8, &["ID employé confirmation", "ID employe confirmation", "Confirmation employé", "Confirmation employe", "ID employé", "ID employe"]),
    (9, &["Véhicule", "Vehicule", "No véhicule", "No vehicule"]),
    (10, &["Classe véhicule affecté", "Classe vehicule affecte", "Véhicule affecté", "Vehicule affecte"]),
    (11, &["Autorisation", "Autorisé", "Autorise"]),
    (12, &["Approuvé", "Approuve", "Approbation"]),
    (13, &["Retour"]),
    (14, &["Adresse début", "Adresse debut", "Adresse de départ", "Adresse de depart"]),
    (15, &["Adresse fin", "Adresse d'arrivée", "Adresse d'arrivee"]),
    (16, &["Changement"]),
    (17, &["Changement par", "Changé par", "Change par", "Modifié par", "Modifie par"]),
];

pub fn column_for(position: u32) -> Option<&'static str> {
    POSITION_TO_COLUMN
        .iter()
        .find(|(p, _)| *p == position)
        .map(|(_, column)| *column)
}

pub fn expected_headers(position: u32) -> Option<&'static [&'static str]> {
    EXPECTED_HEADERS
        .iter()
        .find(|(p, _)| *p == position)
        .map(|(_, headers)| *headers)
}

/// All SQL columns in position order.
pub fn columns() -> impl Iterator<Item = &'static str> {
    POSITION_TO_COLUMN.iter().map(|(_, column)| *column)
}

pub fn is_known_column(name: &str) -> bool {
    columns().any(|c| c == name)
}

/// Canonical (first listed) header for a position.
pub fn canonical_header(position: u32) -> Option<&'static str> {
    expected_headers(position).and_then(|h| h.first().copied())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn every_position_maps_to_a_unique_column() {
        let positions: Vec<u32> = POSITION_TO_COLUMN.iter().map(|(p, _)| *p).collect();
        assert_eq!(positions, (1..=POSITION_COUNT).collect::<Vec<_>>());
        let unique: HashSet<&str> = columns().collect();
        assert_eq!(unique.len(), POSITION_COUNT as usize);
    }

    #[test]
    fn every_position_has_header_variants() {
        for position in 1..=POSITION_COUNT {
            let headers = expected_headers(position).unwrap();
            assert!(!headers.is_empty(), "position {} has no headers", position);
        }
        assert!(expected_headers(18).is_none());
    }

    #[test]
    fn lookups() {
        assert_eq!(column_for(1), Some("tournee"));
        assert_eq!(column_for(9), Some("vehicule"));
        assert_eq!(column_for(0), None);
        assert!(is_known_column("changement_par"));
        assert!(!is_known_column("id"));
        assert_eq!(canonical_header(13), Some("Retour"));
    }
}
