use std::sync::Arc;

use ogss::file::{File, Mode, ObjectRef};
use ogss::state::creator::{ClassDef, FieldDef, SchemaDef};
use ogss::types::FieldType;
use ogss::value::Value;

fn schema() -> SchemaDef {
	SchemaDef {
		classes: vec![
			ClassDef {
				name: "Node",
				super_name: None,
				fields: vec![
					FieldDef { name: "value", field_type: FieldType::I32, auto: false },
					FieldDef { name: "label", field_type: FieldType::String, auto: false },
				],
			},
			ClassDef { name: "Leaf", super_name: Some("Node"), fields: vec![FieldDef { name: "weight", field_type: FieldType::F64, auto: false }] },
		],
		containers: vec![],
		enums: vec![],
		literals: vec!["Node", "Leaf", "value", "label", "weight"],
	}
}

fn main() {
	let schema = schema();
	let path = std::env::temp_dir().join("ogss-demo.ogss");

	let mut file = File::open(&path, &schema, Mode::Create).unwrap();
	{
		let pool = file.registry().pool_by_name("Node").expect("schema declares Node");
		pool.set_static_size(2);
		pool.allocate_block(2, 1);
		let fields = pool.fields.lock().unwrap();
		fields[0].set(0, 1, Value::I32(1));
		fields[1].set(0, 1, Value::String(Arc::from("root")));
		fields[0].set(1, 2, Value::I32(2));
		fields[1].set(1, 2, Value::String(Arc::from("child")));
	}
	file.flush().unwrap();
	println!("wrote {} bytes to {}", std::fs::metadata(&path).unwrap().len(), path.display());
	file.close().unwrap();

	let reopened = File::open(&path, &schema, Mode::Read).unwrap();
	let pool = reopened.pool_by_name("Node").unwrap();
	let fields = pool.fields.lock().unwrap();
	for local in 0..pool.static_size() as usize {
		let value = fields[0].get(local, local as i32 + 1);
		let label = fields[1].get(local, local as i32 + 1);
		println!("Node[{local}]: value={value:?} label={label:?}");
	}
	drop(fields);

	let obj = ObjectRef { pool_index: schema_pool_index(&schema, "Node"), id: 2 };
	println!("contains(Node#2) = {}", reopened.contains(obj));
}

fn schema_pool_index(schema: &SchemaDef, name: &str) -> usize {
	schema.classes.iter().position(|c| c.name == name).expect("class declared in schema")
}
