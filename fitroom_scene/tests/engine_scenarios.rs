//! End-to-end engine scenarios driven through the public API with the
//! headless resource backend: installation lifecycle, loading-complete
//! counting, stale-load discard, fitting, and coverage.

use std::cell::Cell;
use std::path::Path;
use std::rc::Rc;

use glam::{Mat4, Quat, Vec3};

use fitroom_formats::{Document, Mesh, Node, Primitive, Skin, Skinning};
use fitroom_scene::engine::{LoadOutcome, SceneEngine, Slot};
use fitroom_scene::fit::{BoneMatch, FitParams};
use fitroom_scene::loader::LoadError;
use fitroom_scene::{Color, NullResources};

fn node(name: &str) -> Node {
    Node {
        name: name.to_string(),
        parent: None,
        children: Vec::new(),
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
        mesh: None,
        skin: None,
    }
}

/// A box primitive; only the corner positions matter to the engine's bounds
/// and fitting math.
fn box_primitive(min: Vec3, max: Vec3) -> Primitive {
    let corners = [
        [min.x, min.y, min.z],
        [max.x, min.y, min.z],
        [min.x, max.y, min.z],
        [max.x, max.y, min.z],
        [min.x, min.y, max.z],
        [max.x, min.y, max.z],
        [min.x, max.y, max.z],
        [max.x, max.y, max.z],
    ];
    Primitive {
        positions: corners.to_vec(),
        normals: vec![[0.0, 1.0, 0.0]; corners.len()],
        indices: vec![0, 1, 2, 2, 1, 3],
        material: None,
        skinning: None,
    }
}

/// Unskinned avatar: keyword-named torso plus a head clear of any garment.
fn avatar_document() -> Document {
    let mut root = node("Avatar");
    root.children = vec![1, 2];
    let mut torso = node("Torso");
    torso.parent = Some(0);
    torso.mesh = Some(0);
    let mut head = node("Head");
    head.parent = Some(0);
    head.mesh = Some(1);
    Document {
        nodes: vec![root, torso, head],
        roots: vec![0],
        meshes: vec![
            Mesh {
                name: "Torso".to_string(),
                primitives: vec![box_primitive(
                    Vec3::new(-0.3, 0.5, -0.2),
                    Vec3::new(0.3, 1.5, 0.2),
                )],
            },
            Mesh {
                name: "Head".to_string(),
                primitives: vec![box_primitive(
                    Vec3::new(-0.15, 1.9, -0.15),
                    Vec3::new(0.15, 2.3, 0.15),
                )],
            },
        ],
        skins: Vec::new(),
        materials: Vec::new(),
    }
}

/// Avatar with a two-bone rig driving a skinned torso.
fn skinned_avatar_document() -> Document {
    let mut root = node("Armature");
    root.children = vec![1, 3];
    let mut hips = node("Hips");
    hips.parent = Some(0);
    hips.children = vec![2];
    let mut spine = node("Spine");
    spine.parent = Some(1);
    let mut body = node("Body");
    body.parent = Some(0);
    body.mesh = Some(0);
    body.skin = Some(0);

    let mut primitive = box_primitive(Vec3::new(-0.3, 0.0, -0.2), Vec3::new(0.3, 1.8, 0.2));
    primitive.skinning = Some(Skinning {
        joints: vec![[0, 1, 0, 0]; primitive.positions.len()],
        weights: vec![[0.7, 0.3, 0.0, 0.0]; primitive.positions.len()],
    });

    Document {
        nodes: vec![root, hips, spine, body],
        roots: vec![0],
        meshes: vec![Mesh {
            name: "Body".to_string(),
            primitives: vec![primitive],
        }],
        skins: vec![Skin {
            name: "rig".to_string(),
            joints: vec![1, 2],
            inverse_bind: vec![Mat4::IDENTITY; 2],
        }],
        materials: Vec::new(),
    }
}

fn garment_document() -> Document {
    let mut shirt = node("Shirt");
    shirt.mesh = Some(0);
    Document {
        nodes: vec![shirt],
        roots: vec![0],
        meshes: vec![Mesh {
            name: "Shirt".to_string(),
            primitives: vec![box_primitive(
                Vec3::new(-0.8, -1.0, -0.5),
                Vec3::new(0.8, 1.0, 0.5),
            )],
        }],
        skins: Vec::new(),
        materials: Vec::new(),
    }
}

/// Garment rigged with one exact-name bone, one synonym, one unknown.
fn skinned_garment_document(bone_names: [&str; 3]) -> Document {
    let mut root = node("ShirtRoot");
    root.children = vec![1, 2, 3, 4];
    let mut bones: Vec<Node> = bone_names
        .iter()
        .map(|name| {
            let mut bone = node(name);
            bone.parent = Some(0);
            bone
        })
        .collect();
    let mut mesh_node = node("ShirtMesh");
    mesh_node.parent = Some(0);
    mesh_node.mesh = Some(0);
    mesh_node.skin = Some(0);

    let mut primitive = box_primitive(Vec3::new(-0.4, 0.4, -0.3), Vec3::new(0.4, 1.6, 0.3));
    primitive.skinning = Some(Skinning {
        joints: vec![[0, 1, 2, 0]; primitive.positions.len()],
        weights: vec![[0.5, 0.3, 0.2, 0.0]; primitive.positions.len()],
    });

    let mut nodes = vec![root];
    nodes.append(&mut bones);
    nodes.push(mesh_node);

    Document {
        nodes,
        roots: vec![0],
        meshes: vec![Mesh {
            name: "ShirtMesh".to_string(),
            primitives: vec![primitive],
        }],
        skins: vec![Skin {
            name: "shirt-rig".to_string(),
            joints: vec![1, 2, 3],
            inverse_bind: vec![Mat4::IDENTITY; 3],
        }],
        materials: Vec::new(),
    }
}

struct Harness {
    engine: SceneEngine<NullResources>,
    completions: Rc<Cell<u32>>,
}

impl Harness {
    fn new() -> Self {
        Self::with_params(FitParams::default())
    }

    fn with_params(params: FitParams) -> Self {
        let mut engine = SceneEngine::new(NullResources::new(), params);
        let completions = Rc::new(Cell::new(0u32));
        let counter = completions.clone();
        engine.set_loading_listener(move || counter.set(counter.get() + 1));
        Self {
            engine,
            completions,
        }
    }

    /// Request a load and immediately deliver the given document for it.
    fn load(&mut self, slot: Slot, document: Document) {
        let request = match slot {
            Slot::Avatar => self.engine.set_avatar_source(Some(Path::new("stub.glb"))),
            Slot::Garment => self.engine.set_garment_source(Some(Path::new("stub.glb"))),
        }
        .expect("request issued");
        self.engine.finish_load(LoadOutcome {
            slot: request.slot,
            generation: request.generation,
            result: Ok(document),
        });
    }
}

#[test]
fn avatar_with_absent_garment_completes_twice() {
    let mut h = Harness::new();
    h.load(Slot::Avatar, avatar_document());
    assert!(h.engine.set_garment_source(None).is_none());

    assert_eq!(h.completions.get(), 2);
    assert!(h.engine.avatar().is_some());
    assert!(h.engine.garment().is_none());
    assert_eq!(h.engine.resources().live_materials(), 1); // avatar default material
}

#[test]
fn unskinned_garment_fits_by_bounding_boxes() {
    let params = FitParams::default();
    let mut h = Harness::new();
    h.load(Slot::Avatar, avatar_document());
    h.engine.set_garment_color(Color::from_hex("#ff0000").expect("color"));
    h.load(Slot::Garment, garment_document());

    let garment = h.engine.garment().expect("installed");
    let fit = garment.fit.expect("bounding-box fallback used");

    let avatar_size = h.engine.avatar().expect("avatar").bounds.size();
    let garment_size = Vec3::new(1.6, 2.0, 1.0);
    let expected = avatar_size.length() / garment_size.length() * params.scale_factor;
    assert!((fit.scale - expected).abs() < 1e-5);

    let color = h
        .engine
        .resources()
        .material_color(garment.material)
        .expect("shared material");
    assert_eq!(color, Color::new(1.0, 0.0, 0.0));
}

#[test]
fn camera_frames_the_installed_avatar() {
    let mut h = Harness::new();
    h.load(Slot::Avatar, avatar_document());

    let size = h.engine.avatar().expect("avatar").bounds.size();
    let expected =
        size.max_element() / (2.0 * (75.0f32.to_radians() / 2.0).tan()) * 1.5;
    let expected = expected.clamp(1.0, 10.0);
    assert!((h.engine.orbit().distance() - expected).abs() < 1e-5);
    assert!((h.engine.orbit().target.y - size.y * 0.5).abs() < 1e-5);
}

#[test]
fn visibility_toggle_reapplies_coverage_without_reload() {
    let mut h = Harness::new();
    h.load(Slot::Avatar, avatar_document());
    h.load(Slot::Garment, garment_document());

    let torso = *h.engine.hidden().iter().next().expect("torso hidden");
    let decoded_before = h.engine.resources().created_geometries();

    h.engine.set_garment_visible(false);
    assert!(h.engine.hidden().is_empty());
    assert!(h.engine.graph().get(torso).expect("torso").visible);

    h.engine.set_garment_visible(true);
    assert!(h.engine.hidden().contains(&torso));
    assert!(!h.engine.graph().get(torso).expect("torso").visible);
    let garment_root = h.engine.garment().expect("garment").root;
    assert!(h.engine.graph().get(garment_root).expect("root").visible);

    assert_eq!(h.engine.resources().created_geometries(), decoded_before);
    assert_eq!(h.completions.get(), 2); // visibility is not a load
}

#[test]
fn color_change_on_installed_garment_does_not_reload() {
    let mut h = Harness::new();
    h.load(Slot::Avatar, avatar_document());
    h.load(Slot::Garment, garment_document());

    let garment_material = h.engine.garment().expect("garment").material;
    let materials_before = h.engine.resources().created_materials();
    let geometries_before = h.engine.resources().created_geometries();

    let blue = Color::from_hex("#2266ff").expect("color");
    h.engine.set_garment_color(blue);

    assert_eq!(h.engine.resources().created_materials(), materials_before);
    assert_eq!(h.engine.resources().created_geometries(), geometries_before);
    assert_eq!(h.engine.garment().expect("garment").material, garment_material);
    assert_eq!(
        h.engine.resources().material_color(garment_material),
        Some(blue)
    );
}

#[test]
fn zero_sized_resize_recovers() {
    let mut h = Harness::new();
    assert!(h.engine.camera_mut().set_viewport(800, 600));
    assert!(!h.engine.camera_mut().set_viewport(0, 0));
    assert!(h.engine.camera_mut().set_viewport(400, 300));
    assert!((h.engine.camera().aspect() - 400.0 / 300.0).abs() < 1e-6);
}

#[test]
fn stale_completion_is_discarded() {
    let mut h = Harness::new();
    let first = h
        .engine
        .set_avatar_source(Some(Path::new("first.glb")))
        .expect("request");
    let second = h
        .engine
        .set_avatar_source(Some(Path::new("second.glb")))
        .expect("request");
    assert!(second.generation > first.generation);

    h.engine.finish_load(LoadOutcome {
        slot: Slot::Avatar,
        generation: first.generation,
        result: Ok(avatar_document()),
    });
    assert!(h.engine.avatar().is_none(), "stale result must not install");
    assert_eq!(h.completions.get(), 0);

    h.engine.finish_load(LoadOutcome {
        slot: Slot::Avatar,
        generation: second.generation,
        result: Ok(avatar_document()),
    });
    assert!(h.engine.avatar().is_some());
    assert_eq!(h.completions.get(), 1);
}

#[test]
fn decode_failure_still_completes() {
    let mut h = Harness::new();
    let request = h
        .engine
        .set_avatar_source(Some(Path::new("broken.glb")))
        .expect("request");
    h.engine.finish_load(LoadOutcome {
        slot: Slot::Avatar,
        generation: request.generation,
        result: Err(LoadError::Decode {
            path: "broken.glb".into(),
            message: "unexpected magic".to_string(),
        }),
    });
    assert!(h.engine.avatar().is_none());
    assert_eq!(h.completions.get(), 1);
}

#[test]
fn garment_finishing_before_avatar_waits_for_it() {
    let mut h = Harness::new();
    let avatar_request = h
        .engine
        .set_avatar_source(Some(Path::new("avatar.glb")))
        .expect("request");
    let garment_request = h
        .engine
        .set_garment_source(Some(Path::new("shirt.glb")))
        .expect("request");

    // Garment decode wins the race; it must not install against a missing
    // avatar.
    h.engine.finish_load(LoadOutcome {
        slot: Slot::Garment,
        generation: garment_request.generation,
        result: Ok(garment_document()),
    });
    assert!(h.engine.garment().is_none());
    assert_eq!(h.completions.get(), 0);

    h.engine.finish_load(LoadOutcome {
        slot: Slot::Avatar,
        generation: avatar_request.generation,
        result: Ok(avatar_document()),
    });
    assert!(h.engine.avatar().is_some());
    let garment = h.engine.garment().expect("parked garment installed");
    assert!(garment.fit.is_some(), "fit ran against the installed avatar");
    assert_eq!(h.completions.get(), 2);
}

#[test]
fn repeated_load_cycles_leak_nothing() {
    let mut h = Harness::new();
    for _ in 0..4 {
        h.load(Slot::Avatar, avatar_document());
        h.load(Slot::Garment, garment_document());
    }
    // One live installation pair at most.
    assert_eq!(h.engine.resources().live_geometries(), 3);
    assert_eq!(h.engine.resources().live_materials(), 2);

    h.engine.reset();
    assert_eq!(h.engine.resources().live_geometries(), 0);
    assert_eq!(h.engine.resources().live_materials(), 0);
    assert!(h.engine.avatar().is_none());
    assert!(h.engine.garment().is_none());
}

#[test]
fn teardown_is_idempotent_and_silences_later_calls() {
    let mut h = Harness::new();
    h.load(Slot::Avatar, avatar_document());
    h.load(Slot::Garment, garment_document());

    h.engine.teardown();
    assert_eq!(h.engine.resources().live_geometries(), 0);
    assert_eq!(h.engine.resources().live_materials(), 0);

    h.engine.teardown();
    let completions = h.completions.get();
    assert!(h.engine.set_avatar_source(Some(Path::new("late.glb"))).is_none());
    assert!(h.engine.set_garment_source(None).is_none());
    h.engine.set_garment_visible(false);
    h.engine.set_garment_color(Color::WHITE);
    assert_eq!(h.completions.get(), completions);
    assert!(h.engine.draw_items().is_empty());
}

#[test]
fn skinned_garment_binds_to_the_avatar_skeleton() {
    let mut h = Harness::new();
    h.load(Slot::Avatar, skinned_avatar_document());
    h.load(
        Slot::Garment,
        skinned_garment_document(["Hips", "chest_upper", "tail_bone"]),
    );

    let garment = h.engine.garment().expect("installed");
    assert!(garment.fit.is_none(), "skeleton bind skips the bbox fallback");
    let bound = garment.bound_bones.as_ref().expect("bind recorded");

    let avatar = h.engine.avatar().expect("avatar");
    let hips = avatar.bone_index.get("Hips").copied().expect("hips bone");
    let spine = avatar.bone_index.get("Spine").copied().expect("spine bone");
    assert_eq!(bound.get("Hips"), Some(&BoneMatch::Exact(hips)));
    assert_eq!(bound.get("chest_upper"), Some(&BoneMatch::Synonym(spine)));
    assert_eq!(bound.get("tail_bone"), Some(&BoneMatch::Placeholder));
}

#[test]
fn low_confidence_bind_downgrades_to_the_bbox_fallback() {
    let mut h = Harness::with_params(FitParams {
        bind_confidence_min: 0.9,
        ..FitParams::default()
    });
    h.load(Slot::Avatar, skinned_avatar_document());
    h.load(
        Slot::Garment,
        skinned_garment_document(["Hips", "fin_left", "tail_bone"]),
    );

    let garment = h.engine.garment().expect("installed");
    assert!(garment.bound_bones.is_none());
    assert!(garment.fit.is_some(), "fallback fit applied instead");
}

#[test]
fn draw_items_respect_coverage_and_visibility() {
    let mut h = Harness::new();
    h.load(Slot::Avatar, avatar_document());
    h.load(Slot::Garment, garment_document());

    // Torso is covered: head + shirt remain.
    let items = h.engine.draw_items();
    assert_eq!(items.len(), 2);

    h.engine.set_garment_visible(false);
    // Shirt hidden, torso restored: head + torso.
    let items = h.engine.draw_items();
    assert_eq!(items.len(), 2);

    h.engine.set_garment_visible(true);
    h.engine.set_garment_source(None);
    let items = h.engine.draw_items();
    assert_eq!(items.len(), 2, "avatar fully visible once garment is gone");
}
