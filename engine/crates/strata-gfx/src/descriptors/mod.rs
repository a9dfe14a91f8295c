pub mod write_descriptor_set;
