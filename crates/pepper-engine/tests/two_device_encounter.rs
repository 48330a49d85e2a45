//! Two devices exchange EBID slices out of order and each reconstructs the
//! other's identity, derives mirrored PETs, and survives finalisation.

use pepper_core::crypto::{gen_pet_pair, Keys};
use pepper_core::ebid::{Ebid, SLICE_1, SLICE_2, SLICE_3};
use pepper_engine::{EdList, EpochEngine, EpochParams};

/// Wire-form slice 3 (4 leading zero bytes, 8 meaningful trailing bytes),
/// matching what a decoded [`pepper_radio::AdPayload`] would carry.
fn to_wire_slice3(storage: [u8; 12]) -> [u8; 12] {
    let mut wire = [0u8; 12];
    wire[4..12].copy_from_slice(&storage[0..8]);
    wire
}

#[test]
fn mirrored_pets_survive_out_of_order_slice_delivery() {
    let alice_keys = Keys::generate();
    let bob_keys = Keys::generate();
    let alice_ebid = Ebid::generate_from(&alice_keys.public_bytes());
    let bob_ebid = Ebid::generate_from(&bob_keys.public_bytes());

    let mut alice_list = EdList::new(4);
    let mut bob_list = EdList::new(4);

    let alice_local = alice_keys.public_bytes();
    let bob_local = bob_keys.public_bytes();

    // Alice receives Bob's slices out of the carousel order; Bob receives
    // Alice's in carousel order. Reconstruction must not depend on it.
    for sid in [SLICE_2, SLICE_1, SLICE_3] {
        let slice = bob_ebid.get_slice(sid).unwrap();
        let wire = if sid == SLICE_3 { to_wire_slice3(slice) } else { slice };
        alice_list.process_slice(0xB0B, 10, sid, wire, &alice_local).unwrap();
    }
    for sid in [SLICE_1, SLICE_2, SLICE_3] {
        let slice = alice_ebid.get_slice(sid).unwrap();
        let wire = if sid == SLICE_3 { to_wire_slice3(slice) } else { slice };
        bob_list.process_slice(0xA11CE, 10, sid, wire, &bob_local).unwrap();
    }

    // Feed enough BLE samples, spread over time, to clear the exposure floor.
    alice_list.obfuscation_enabled = false;
    bob_list.obfuscation_enabled = false;
    alice_list.process_scan_sample(0xB0B, 10, -55);
    alice_list.process_scan_sample(0xB0B, 45, -57);
    bob_list.process_scan_sample(0xA11CE, 10, -55);
    bob_list.process_scan_sample(0xA11CE, 45, -57);

    let alice_contacts = alice_list.finalise(30, 8, &alice_keys);
    let bob_contacts = bob_list.finalise(30, 8, &bob_keys);

    assert_eq!(alice_contacts.len(), 1);
    assert_eq!(bob_contacts.len(), 1);

    // Mirroring: Alice's ET for the encounter equals Bob's RT, and vice versa.
    assert_eq!(alice_contacts[0].pet.et, bob_contacts[0].pet.rt);
    assert_eq!(alice_contacts[0].pet.rt, bob_contacts[0].pet.et);

    // Cross-check against a direct derivation from the raw EBIDs.
    let direct_alice = gen_pet_pair(&alice_keys, &bob_local).unwrap();
    assert_eq!(direct_alice, alice_contacts[0].pet);
}

#[test]
fn insufficient_exposure_drops_the_contact_on_both_sides() {
    let alice_keys = Keys::generate();
    let bob_keys = Keys::generate();

    let mut alice_list = EdList::new(4);
    let alice_local = alice_keys.public_bytes();
    let bob_slices = bob_ebid_slices(&bob_keys);

    for sid in [SLICE_1, SLICE_2, SLICE_3] {
        alice_list
            .process_slice(0xB0B, 0, sid, bob_slices[sid as usize], &alice_local)
            .unwrap();
    }
    // A single sample at t=0 gives zero exposure duration; below the floor.
    alice_list.process_scan_sample(0xB0B, 0, -60);

    let contacts = alice_list.finalise(30, 8, &alice_keys);
    assert!(contacts.is_empty());
}

fn bob_ebid_slices(bob_keys: &Keys) -> [[u8; 12]; 3] {
    let bob_ebid = Ebid::generate_from(&bob_keys.public_bytes());
    [
        bob_ebid.get_slice(SLICE_1).unwrap(),
        bob_ebid.get_slice(SLICE_2).unwrap(),
        to_wire_slice3(bob_ebid.get_slice(SLICE_3).unwrap()),
    ]
}

#[test]
fn epoch_engine_drives_finalisation_end_to_end() {
    let mut engine = EpochEngine::new(EpochParams {
        duration_s: 60,
        min_exposure_s: 20,
        top_k: 4,
        adv_interval_ms: 200,
        ..Default::default()
    });

    engine.setup(0, 0).unwrap();
    engine.mark_active().unwrap();

    let local_ebid = engine.local_ebid().unwrap().get_full().unwrap();
    let peer_keys = Keys::generate();
    let peer_ebid = Ebid::generate_from(&peer_keys.public_bytes());

    for sid in [SLICE_1, SLICE_2, SLICE_3] {
        let slice = peer_ebid.get_slice(sid).unwrap();
        let wire = if sid == SLICE_3 { to_wire_slice3(slice) } else { slice };
        engine
            .ed_list_mut()
            .process_slice(0xF00D, 5, sid, wire, &local_ebid)
            .unwrap();
    }
    engine.ed_list_mut().obfuscation_enabled = false;
    engine.ed_list_mut().process_scan_sample(0xF00D, 5, -50);
    engine.ed_list_mut().process_scan_sample(0xF00D, 30, -52);

    let outcome = engine.end_of_epoch(60).unwrap();
    assert_eq!(outcome.summary.contacts.len(), 1);
    assert!(outcome.continue_running);
}
