//! Graph execution engine and node metamodel: the declarative attribute
//! system, the registry, and the topological scheduler. No threads, no
//! I/O, and no wire format live here — see `minicortex-runtime` for the
//! lifecycle supervisor, control plane, hot-reload driver, and workspace
//! persistence built on top of this crate.

mod as_any;
pub mod descriptor;
pub mod error;
mod ids;
pub mod node;
pub mod registry;
pub mod scheduler;
pub mod value;

pub use as_any::{AsAny, AsAnyHelper};
pub use error::{MiniCortexError, Result};
pub use ids::{InstanceId, PortKey, TypeName};
pub use value::Value;

pub mod prelude {
    pub use crate::descriptor::{
        ActionDescriptor, DisplayDescriptor, DisplayKind, NodeSchema, PaletteCategory,
        PortDescriptor, PropertyDescriptor, PropertyKind, StoreDescriptor,
    };
    pub use crate::node::{Node, NodeClass, NodeContext, NodeInstance};
    pub use crate::registry::{Connection, Registry, Snapshot, Viewport};
    pub use crate::scheduler::{build_order, classify_edges, run_tick, EdgeClass};
    pub use crate::value::{DType, NdArray, Value};
    pub use crate::{InstanceId, MiniCortexError, Result, TypeName};
}

#[cfg(test)]
mod tests {
    //! The concrete scenarios from spec §8, built on small single-purpose
    //! node types defined here rather than in a separate example-node
    //! crate (built-in example nodes are out of scope).
    use crate::descriptor::Descriptor;
    use crate::prelude::*;

    struct ConstNode {
        value: i64,
    }
    impl Node for ConstNode {
        fn process(&mut self, ctx: &mut NodeContext) -> Result<()> {
            ctx.set_output("out", Value::Int(self.value));
            Ok(())
        }
    }

    fn const_class(value: i64) -> NodeClass {
        NodeClass::new(
            NodeSchema {
                type_name: "const".into(),
                category: PaletteCategory::Input,
                descriptors: vec![Descriptor::OutputPort(PortDescriptor {
                    key: "out".into(),
                    label: "out".into(),
                    data_type: "int".into(),
                })],
                dynamic: false,
                source_file: None,
            },
            std::sync::Arc::new(move || Box::new(ConstNode { value }) as Box<dyn Node>),
        )
    }

    struct BiasAddNode;
    impl Node for BiasAddNode {
        fn process(&mut self, ctx: &mut NodeContext) -> Result<()> {
            let x = ctx.get_input("x");
            let bias = ctx.get_property("bias");
            let (Some(x), Some(bias)) = (x.as_i64(), bias.as_i64()) else {
                return Ok(());
            };
            ctx.set_output("y", Value::Int(x + bias));
            Ok(())
        }
    }

    fn bias_add_class() -> NodeClass {
        NodeClass::new(
            NodeSchema {
                type_name: "bias_add".into(),
                category: PaletteCategory::Processing,
                descriptors: vec![
                    Descriptor::InputPort(PortDescriptor {
                        key: "x".into(),
                        label: "x".into(),
                        data_type: "int".into(),
                    }),
                    Descriptor::Property(PropertyDescriptor {
                        key: "bias".into(),
                        label: "bias".into(),
                        kind: PropertyKind::Integer {
                            min: None,
                            max: None,
                        },
                        default: Value::Int(3),
                        on_change: None,
                    }),
                    Descriptor::OutputPort(PortDescriptor {
                        key: "y".into(),
                        label: "y".into(),
                        data_type: "int".into(),
                    }),
                ],
                dynamic: false,
                source_file: None,
            },
            std::sync::Arc::new(|| Box::new(BiasAddNode) as Box<dyn Node>),
        )
    }

    struct AccumulateNode;
    impl Node for AccumulateNode {
        fn process(&mut self, ctx: &mut NodeContext) -> Result<()> {
            let prev = ctx.get_input("prev").as_i64().unwrap_or(0);
            ctx.set_output("curr", Value::Int(prev + 1));
            Ok(())
        }
    }

    fn accumulate_class() -> NodeClass {
        NodeClass::new(
            NodeSchema {
                type_name: "accumulate".into(),
                category: PaletteCategory::Processing,
                descriptors: vec![
                    Descriptor::InputPort(PortDescriptor {
                        key: "prev".into(),
                        label: "prev".into(),
                        data_type: "int".into(),
                    }),
                    Descriptor::OutputPort(PortDescriptor {
                        key: "curr".into(),
                        label: "curr".into(),
                        data_type: "int".into(),
                    }),
                ],
                dynamic: false,
                source_file: None,
            },
            std::sync::Arc::new(|| Box::new(AccumulateNode) as Box<dyn Node>),
        )
    }

    struct FailingNode;
    impl Node for FailingNode {
        fn process(&mut self, _ctx: &mut NodeContext) -> Result<()> {
            Err(MiniCortexError::NodeRuntime {
                instance: InstanceId::new(),
                type_name: "failing".into(),
                message: "boom".into(),
            })
        }
    }

    fn failing_class() -> NodeClass {
        NodeClass::new(
            NodeSchema {
                type_name: "failing".into(),
                category: PaletteCategory::Utilities,
                descriptors: vec![],
                dynamic: false,
                source_file: None,
            },
            std::sync::Arc::new(|| Box::new(FailingNode) as Box<dyn Node>),
        )
    }

    #[test]
    fn two_node_feedforward() {
        let mut reg = Registry::new();
        reg.register_class(const_class(7));
        reg.register_class(bias_add_class());
        let a = reg.create_instance(&"const".into(), (0.0, 0.0)).unwrap();
        let b = reg.create_instance(&"bias_add".into(), (1.0, 0.0)).unwrap();
        reg.connect(a, "out", b, "x").unwrap();

        run_tick(&mut reg).unwrap();

        assert_eq!(reg.signals().read_previous(a, "out"), Value::Int(7));
        assert_eq!(reg.signals().read_previous(b, "y"), Value::Int(10));
    }

    #[test]
    fn self_loop_feedback() {
        let mut reg = Registry::new();
        reg.register_class(accumulate_class());
        let c = reg
            .create_instance(&"accumulate".into(), (0.0, 0.0))
            .unwrap();
        reg.connect(c, "curr", c, "prev").unwrap();

        let expected = [1, 2, 3, 4, 5, 6];
        for exp in expected {
            run_tick(&mut reg).unwrap();
            assert_eq!(reg.signals().read_previous(c, "curr"), Value::Int(exp));
        }
    }

    #[test]
    fn two_cycle_exactly_one_feedback_edge() {
        let mut reg = Registry::new();
        reg.register_class(accumulate_class());
        let x = reg
            .create_instance(&"accumulate".into(), (0.0, 0.0))
            .unwrap();
        let y = reg
            .create_instance(&"accumulate".into(), (1.0, 0.0))
            .unwrap();
        reg.connect(x, "curr", y, "prev").unwrap();
        reg.connect(y, "curr", x, "prev").unwrap();

        let order = build_order(&reg);
        let classes = classify_edges(&order, reg.connections());
        let feedback_count = classes.iter().filter(|c| **c == EdgeClass::Feedback).count();
        assert_eq!(feedback_count, 1);
        assert_eq!(order.len(), 2);

        run_tick(&mut reg).unwrap();
        run_tick(&mut reg).unwrap();
    }

    #[test]
    fn port_busy_rejection() {
        let mut reg = Registry::new();
        reg.register_class(const_class(1));
        reg.register_class(bias_add_class());
        let a = reg.create_instance(&"const".into(), (0.0, 0.0)).unwrap();
        let a2 = reg.create_instance(&"const".into(), (0.0, 1.0)).unwrap();
        let b = reg.create_instance(&"bias_add".into(), (1.0, 0.0)).unwrap();
        reg.connect(a, "out", b, "x").unwrap();

        let err = reg.connect(a2, "out", b, "x").unwrap_err();
        assert!(matches!(err, MiniCortexError::PortBusy { .. }));
        assert_eq!(reg.connections().len(), 1);
    }

    #[test]
    fn type_mismatch_rejected_any_accepted() {
        let mut reg = Registry::new();
        let array_out = NodeClass::new(
            NodeSchema {
                type_name: "array_out".into(),
                category: PaletteCategory::Input,
                descriptors: vec![Descriptor::OutputPort(PortDescriptor {
                    key: "out".into(),
                    label: "out".into(),
                    data_type: "ndarray".into(),
                })],
                dynamic: false,
                source_file: None,
            },
            std::sync::Arc::new(|| Box::new(ConstNode { value: 0 }) as Box<dyn Node>),
        );
        let int_in = NodeClass::new(
            NodeSchema {
                type_name: "int_in".into(),
                category: PaletteCategory::Output,
                descriptors: vec![Descriptor::InputPort(PortDescriptor {
                    key: "x".into(),
                    label: "x".into(),
                    data_type: "int".into(),
                })],
                dynamic: false,
                source_file: None,
            },
            std::sync::Arc::new(|| Box::new(AccumulateNode) as Box<dyn Node>),
        );
        reg.register_class(array_out);
        reg.register_class(int_in);
        let a = reg.create_instance(&"array_out".into(), (0.0, 0.0)).unwrap();
        let b = reg.create_instance(&"int_in".into(), (1.0, 0.0)).unwrap();
        let err = reg.connect(a, "out", b, "x").unwrap_err();
        assert!(matches!(err, MiniCortexError::TypeMismatch { .. }));

        let any_in = NodeClass::new(
            NodeSchema {
                type_name: "any_in".into(),
                category: PaletteCategory::Output,
                descriptors: vec![Descriptor::InputPort(PortDescriptor {
                    key: "x".into(),
                    label: "x".into(),
                    data_type: "any".into(),
                })],
                dynamic: false,
                source_file: None,
            },
            std::sync::Arc::new(|| Box::new(AccumulateNode) as Box<dyn Node>),
        );
        reg.register_class(any_in);
        let c = reg.create_instance(&"any_in".into(), (2.0, 0.0)).unwrap();
        reg.connect(a, "out", c, "x").unwrap();
    }

    #[test]
    fn delete_instance_removes_touching_connections() {
        let mut reg = Registry::new();
        reg.register_class(const_class(1));
        reg.register_class(bias_add_class());
        let a = reg.create_instance(&"const".into(), (0.0, 0.0)).unwrap();
        let b = reg.create_instance(&"bias_add".into(), (1.0, 0.0)).unwrap();
        reg.connect(a, "out", b, "x").unwrap();
        reg.delete_instance(a).unwrap();
        assert!(reg.connections().is_empty());
    }

    #[test]
    fn error_isolation_stops_with_node_identified() {
        let mut reg = Registry::new();
        reg.register_class(const_class(1));
        reg.register_class(failing_class());
        let _a = reg.create_instance(&"const".into(), (0.0, 0.0)).unwrap();
        let f = reg.create_instance(&"failing".into(), (1.0, 0.0)).unwrap();

        let err = run_tick(&mut reg).unwrap_err();
        match err {
            MiniCortexError::NodeRuntime { instance, .. } => assert_eq!(instance, f),
            other => panic!("expected NodeRuntime, got {other:?}"),
        }
        assert!(reg.instance(f).unwrap().error.is_some());
    }

    #[test]
    fn property_write_is_coerced_and_clamped() {
        let descriptor = PropertyDescriptor {
            key: "bias".into(),
            label: "bias".into(),
            kind: PropertyKind::Range {
                min: 0.0,
                max: 10.0,
                log_scale: false,
            },
            default: Value::Float(0.0),
            on_change: None,
        };
        let coerced = descriptor.coerce(&Value::Float(99.0)).unwrap();
        assert_eq!(coerced, Value::Float(10.0));

        let enum_desc = PropertyDescriptor {
            key: "mode".into(),
            label: "mode".into(),
            kind: PropertyKind::Enum {
                options: vec!["a".into(), "b".into()],
            },
            default: Value::Str("a".into()),
            on_change: None,
        };
        assert!(enum_desc.coerce(&Value::Str("z".into())).is_err());
        assert_eq!(
            enum_desc.coerce(&Value::Str("b".into())).unwrap(),
            Value::Str("b".into())
        );
    }

    #[test]
    fn no_aliasing_across_nodes_in_a_tick() {
        use crate::value::{DType, NdArray};
        use ndarray::ArrayD;

        struct ArraySourceNode;
        impl Node for ArraySourceNode {
            fn process(&mut self, ctx: &mut NodeContext) -> Result<()> {
                let arr = NdArray::new(DType::F64, ArrayD::from_elem(vec![2, 2], 1.0));
                ctx.set_output("out", Value::Array(arr));
                Ok(())
            }
        }
        struct ArrayMutatorNode;
        impl Node for ArrayMutatorNode {
            fn process(&mut self, ctx: &mut NodeContext) -> Result<()> {
                if let Value::Array(mut arr) = ctx.get_input("x") {
                    arr.data[[0, 0]] = 42.0;
                    ctx.set_output("y", Value::Array(arr));
                }
                Ok(())
            }
        }

        let mut reg = Registry::new();
        let source = NodeClass::new(
            NodeSchema {
                type_name: "array_source".into(),
                category: PaletteCategory::Input,
                descriptors: vec![Descriptor::OutputPort(PortDescriptor {
                    key: "out".into(),
                    label: "out".into(),
                    data_type: "ndarray".into(),
                })],
                dynamic: false,
                source_file: None,
            },
            std::sync::Arc::new(|| Box::new(ArraySourceNode) as Box<dyn Node>),
        );
        let mutator = NodeClass::new(
            NodeSchema {
                type_name: "array_mutator".into(),
                category: PaletteCategory::Processing,
                descriptors: vec![
                    Descriptor::InputPort(PortDescriptor {
                        key: "x".into(),
                        label: "x".into(),
                        data_type: "ndarray".into(),
                    }),
                    Descriptor::OutputPort(PortDescriptor {
                        key: "y".into(),
                        label: "y".into(),
                        data_type: "ndarray".into(),
                    }),
                ],
                dynamic: false,
                source_file: None,
            },
            std::sync::Arc::new(|| Box::new(ArrayMutatorNode) as Box<dyn Node>),
        );
        reg.register_class(source);
        reg.register_class(mutator);
        let s = reg
            .create_instance(&"array_source".into(), (0.0, 0.0))
            .unwrap();
        let m = reg
            .create_instance(&"array_mutator".into(), (1.0, 0.0))
            .unwrap();
        reg.connect(s, "out", m, "x").unwrap();

        run_tick(&mut reg).unwrap();

        let original = reg.signals().read_previous(s, "out");
        if let Value::Array(arr) = original {
            assert_eq!(arr.data[[0, 0]], 1.0);
        } else {
            panic!("expected array");
        }
    }
}
