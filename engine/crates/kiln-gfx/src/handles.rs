use slotmap::new_key_type;

new_key_type! { pub struct TextureId; }
new_key_type! { pub struct BufferId; }
new_key_type! { pub struct VertexArrayId; }
new_key_type! { pub struct ShaderId; }
new_key_type! { pub struct ProgramId; }
new_key_type! { pub struct SyncId; }
