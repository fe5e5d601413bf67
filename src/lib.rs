//! Cardlayers: layered compositing engine for ID-card editing.
//!
//! An ID card side is a stack of raster layers over a background. Tools
//! turn pointer input into selections, strokes and fills; remote AI jobs
//! decompose, upscale or inpaint layers; every change is undoable and every
//! remote job shows up in a reconciled history list.
//!
//! | Module      | Role                                                        |
//! |-------------|-------------------------------------------------------------|
//! | `layers`    | `LayerManager`: z-ordered layers, selections, masks, caches |
//! | `undo`      | Bounded undo/redo stacks of layer snapshots                  |
//! | `tools`     | Pointer/key state machines emitting `Action`s                |
//! | `raster`    | RGBA surfaces, compositing, PNG encode/decode                |
//! | `hit`       | Alpha maps for pixel-accurate hit testing                    |
//! | `blob`      | Single-owner ephemeral binary handles                        |
//! | `remote`    | `RemoteApi` trait and its reqwest implementation             |
//! | `services`  | Async workflows: compose, upload, history, processor, actions |
//! | `session`   | Serializable session records and stores                      |
//! | `state`     | `EditorState`: shared handles wired together                 |
//! | `watermark` | Least-significant-bit scrub applied before upscaling         |
//! | `geometry`  | Bounds, points and surface dimensions                        |
//! | `config`    | `EditorConfig` from environment variables                    |
//! | `notify`    | User-facing notices                                          |

pub mod blob;
pub mod config;
pub mod consts;
pub mod error;
pub mod geometry;
pub mod hit;
pub mod layers;
pub mod notify;
pub mod raster;
pub mod remote;
pub mod services;
pub mod session;
pub mod state;
pub mod tools;
pub mod undo;
pub mod watermark;
