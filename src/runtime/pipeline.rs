//! Pipeline builder: named nodes, typed links, one scheduler

use super::errors::ConnectionError;
use super::node::{InputPort, OutputPort, ProcessNode};
use super::ports::PortSchema;
use super::scheduler::Scheduler;
use super::type_registry::registry;
use super::watchdog::Watchdog;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

/// Default link capacity in messages
pub const DEFAULT_BUFFER_SIZE: usize = 1000;

pub struct Pipeline {
    nodes: Vec<(usize, Box<dyn ProcessNode>)>,
    node_names: HashMap<String, usize>,
    node_schemas: HashMap<usize, (Vec<PortSchema>, Vec<PortSchema>)>,
    connections: Vec<PendingConnection>,
    next_id: usize,
    default_buffer_size: usize,
    block_threshold: Option<Duration>,
}

struct PendingConnection {
    from_node: usize,
    from_port: usize,
    to_node: usize,
    to_port: usize,
    type_id: TypeId,
    buffer_size: usize,
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            node_names: HashMap::new(),
            node_schemas: HashMap::new(),
            connections: Vec::new(),
            next_id: 0,
            default_buffer_size: DEFAULT_BUFFER_SIZE,
            block_threshold: None,
        }
    }

    pub fn with_default_buffer_size(mut self, size: usize) -> Self {
        self.default_buffer_size = size;
        self
    }

    /// Warn about links blocked longer than `threshold` instead of the default
    pub fn with_block_threshold(mut self, threshold: Duration) -> Self {
        self.block_threshold = Some(threshold);
        self
    }

    /// Add a node under a unique name
    pub fn add_process<N: ProcessNode + 'static>(
        &mut self,
        name: impl Into<String>,
        node: N,
    ) -> Result<(), ConnectionError> {
        let name = name.into();
        if self.node_names.contains_key(&name) {
            return Err(ConnectionError::DuplicateNode(name));
        }

        let id = self.next_id;
        self.next_id += 1;

        self.node_schemas
            .insert(id, (node.input_schema(), node.output_schema()));
        self.node_names.insert(name, id);
        self.nodes.push((id, Box::new(node)));
        Ok(())
    }

    pub fn connect(
        &mut self,
        from_node: &str,
        from_port: &str,
        to_node: &str,
        to_port: &str,
    ) -> Result<(), ConnectionError> {
        self.connect_with_buffer(from_node, from_port, to_node, to_port, self.default_buffer_size)
    }

    /// Link an output port to an input port. Outputs may fan out to several
    /// inputs; each input accepts one link.
    pub fn connect_with_buffer(
        &mut self,
        from_node: &str,
        from_port: &str,
        to_node: &str,
        to_port: &str,
        buffer_size: usize,
    ) -> Result<(), ConnectionError> {
        let from_id = self.node_id(from_node)?;
        let to_id = self.node_id(to_node)?;
        let from_schema = self.output_port(from_id, from_node, from_port)?;
        let to_schema = self.input_port(to_id, to_node, to_port)?;

        if from_schema.type_id != to_schema.type_id {
            return Err(ConnectionError::TypeMismatch {
                from_node: from_node.to_string(),
                from_port: from_port.to_string(),
                from_type: from_schema.type_id,
                to_node: to_node.to_string(),
                to_port: to_port.to_string(),
                to_type: to_schema.type_id,
            });
        }

        if self
            .connections
            .iter()
            .any(|c| c.to_node == to_id && c.to_port == to_schema.index)
        {
            return Err(ConnectionError::DuplicateConnection {
                node: to_node.to_string(),
                port: to_port.to_string(),
            });
        }

        let connection = PendingConnection {
            from_node: from_id,
            from_port: from_schema.index,
            to_node: to_id,
            to_port: to_schema.index,
            type_id: from_schema.type_id,
            buffer_size,
        };
        self.connections.push(connection);
        Ok(())
    }

    fn node_id(&self, name: &str) -> Result<usize, ConnectionError> {
        self.node_names
            .get(name)
            .copied()
            .ok_or_else(|| ConnectionError::NodeNotFound(name.to_string()))
    }

    fn output_port(&self, id: usize, node: &str, port: &str) -> Result<&PortSchema, ConnectionError> {
        self.node_schemas
            .get(&id)
            .and_then(|(_, outputs)| outputs.iter().find(|s| s.name == port))
            .ok_or_else(|| ConnectionError::PortNotFound {
                node: node.to_string(),
                port: port.to_string(),
            })
    }

    fn input_port(&self, id: usize, node: &str, port: &str) -> Result<&PortSchema, ConnectionError> {
        self.node_schemas
            .get(&id)
            .and_then(|(inputs, _)| inputs.iter().find(|s| s.name == port))
            .ok_or_else(|| ConnectionError::PortNotFound {
                node: node.to_string(),
                port: port.to_string(),
            })
    }

    pub fn list_node_inputs(&self, name: &str) -> Result<&[PortSchema], ConnectionError> {
        let id = self.node_id(name)?;
        Ok(self
            .node_schemas
            .get(&id)
            .map(|(inputs, _)| inputs.as_slice())
            .unwrap_or_default())
    }

    pub fn list_node_outputs(&self, name: &str) -> Result<&[PortSchema], ConnectionError> {
        let id = self.node_id(name)?;
        Ok(self
            .node_schemas
            .get(&id)
            .map(|(_, outputs)| outputs.as_slice())
            .unwrap_or_default())
    }

    pub fn list_nodes(&self) -> Vec<&str> {
        self.node_names.keys().map(|s| s.as_str()).collect()
    }

    /// Create every link and start every node on its own thread.
    pub fn build(mut self) -> Result<Scheduler, ConnectionError> {
        info!(
            "Building pipeline with {} nodes and {} connections",
            self.nodes.len(),
            self.connections.len()
        );

        let watchdog = match self.block_threshold {
            Some(threshold) => Watchdog::with_threshold(threshold),
            None => Watchdog::new(),
        };
        let mut scheduler = Scheduler::with_watchdog(watchdog.clone());

        type PortKey = (usize, usize);
        let mut receivers: HashMap<PortKey, Box<dyn Any + Send>> = HashMap::new();
        let mut senders: HashMap<PortKey, (TypeId, Vec<Box<dyn Any + Send>>)> = HashMap::new();
        let mut ready = Vec::with_capacity(self.nodes.len());

        {
            let registry = registry();

            for conn in &self.connections {
                let (tx, rx) = registry.create_channel(conn.type_id, conn.buffer_size)?;
                receivers.insert((conn.to_node, conn.to_port), rx);
                senders
                    .entry((conn.from_node, conn.from_port))
                    .or_insert_with(|| (conn.type_id, Vec::new()))
                    .1
                    .push(tx);
            }

            for (node_id, node) in self.nodes.drain(..) {
                let node_name = node.name().to_string();
                let input_schemas = node.input_schema();
                let output_schemas = node.output_schema();

                debug!("Wiring node {}: {}", node_id, node_name);

                // Unconnected ports get a unit placeholder; `get()` on them yields None
                let input_ports: Vec<InputPort> = (0..node.num_inputs())
                    .map(|i| {
                        let port_name = input_schemas
                            .get(i)
                            .map(|s| s.name.clone())
                            .unwrap_or_else(|| format!("in{}", i));
                        receivers
                            .remove(&(node_id, i))
                            .map(InputPort::from_type_erased)
                            .unwrap_or_else(|| InputPort::from_type_erased(Box::new(())))
                            .with_watchdog(&watchdog, &node_name, &port_name)
                    })
                    .collect();

                let output_ports = (0..node.num_outputs())
                    .map(|i| {
                        let port_name = output_schemas
                            .get(i)
                            .map(|s| s.name.clone())
                            .unwrap_or_else(|| format!("out{}", i));
                        let port = match senders.remove(&(node_id, i)) {
                            Some((type_id, list)) => {
                                OutputPort::from_type_erased(registry.wrap_output(type_id, list)?)
                            }
                            None => OutputPort::from_type_erased(Box::new(())),
                        };
                        Ok(port.with_watchdog(&watchdog, &node_name, &port_name))
                    })
                    .collect::<Result<Vec<_>, ConnectionError>>()?;

                ready.push((node, input_ports, output_ports));
            }
        }

        for (node, inputs, outputs) in ready {
            scheduler.start_process(node, inputs, outputs)?;
        }

        info!(
            "Pipeline built successfully with {} threads",
            scheduler.num_threads()
        );
        Ok(scheduler)
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::errors::{WorkError, WorkResult};
    use crate::runtime::VoltageSample;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    struct RampSource {
        next: u32,
        end: u32,
    }

    impl ProcessNode for RampSource {
        fn name(&self) -> &str {
            "ramp"
        }
        fn should_stop(&self) -> bool {
            self.next >= self.end
        }
        fn num_inputs(&self) -> usize {
            0
        }
        fn num_outputs(&self) -> usize {
            1
        }
        fn output_schema(&self) -> Vec<PortSchema> {
            vec![PortSchema::output::<VoltageSample>("samples", 0)]
        }
        fn work(&mut self, _inputs: &[InputPort], outputs: &[OutputPort]) -> WorkResult<usize> {
            let out = outputs[0]
                .get::<VoltageSample>()
                .ok_or_else(|| WorkError::NodeError("samples output".into()))?;
            out.send(VoltageSample::new(3.0, self.next))?;
            self.next += 1;
            Ok(1)
        }
    }

    struct Formatter {
        buffer: VecDeque<VoltageSample>,
    }

    impl ProcessNode for Formatter {
        fn name(&self) -> &str {
            "formatter"
        }
        fn num_inputs(&self) -> usize {
            1
        }
        fn num_outputs(&self) -> usize {
            1
        }
        fn input_schema(&self) -> Vec<PortSchema> {
            vec![PortSchema::input::<VoltageSample>("samples", 0)]
        }
        fn output_schema(&self) -> Vec<PortSchema> {
            vec![PortSchema::output::<String>("link", 0)]
        }
        fn work(&mut self, inputs: &[InputPort], outputs: &[OutputPort]) -> WorkResult<usize> {
            let mut input = inputs[0]
                .get::<VoltageSample>(&mut self.buffer)
                .ok_or_else(|| WorkError::NodeError("samples input".into()))?;
            let sample = input.recv()?;
            if let Some(out) = outputs[0].get::<String>() {
                out.send(sample.to_string())?;
            }
            Ok(1)
        }
    }

    struct LineSink {
        buffer: VecDeque<String>,
        lines: Arc<Mutex<Vec<String>>>,
    }

    impl ProcessNode for LineSink {
        fn name(&self) -> &str {
            "sink"
        }
        fn num_inputs(&self) -> usize {
            1
        }
        fn num_outputs(&self) -> usize {
            0
        }
        fn input_schema(&self) -> Vec<PortSchema> {
            vec![PortSchema::input::<String>("link", 0)]
        }
        fn work(&mut self, inputs: &[InputPort], _outputs: &[OutputPort]) -> WorkResult<usize> {
            let mut input = inputs[0]
                .get::<String>(&mut self.buffer)
                .ok_or_else(|| WorkError::NodeError("link input".into()))?;
            let line = input.recv()?;
            self.lines.lock().unwrap().push(line);
            Ok(0)
        }
    }

    fn formatter() -> Formatter {
        Formatter {
            buffer: VecDeque::new(),
        }
    }

    fn sink(lines: &Arc<Mutex<Vec<String>>>) -> LineSink {
        LineSink {
            buffer: VecDeque::new(),
            lines: Arc::clone(lines),
        }
    }

    #[test]
    fn test_chain_runs_end_to_end() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::new().with_default_buffer_size(4);
        pipeline.add_process("ramp", RampSource { next: 0, end: 3 }).unwrap();
        pipeline.add_process("formatter", formatter()).unwrap();
        pipeline.add_process("sink", sink(&lines)).unwrap();
        pipeline.connect("ramp", "samples", "formatter", "samples").unwrap();
        pipeline.connect("formatter", "link", "sink", "link").unwrap();

        let summary = pipeline.build().unwrap().wait();
        assert!(summary.is_clean());
        assert_eq!(
            *lines.lock().unwrap(),
            vec![
                "Sample[3.000 V, t=0 ms]",
                "Sample[3.000 V, t=1 ms]",
                "Sample[3.000 V, t=2 ms]"
            ]
        );
    }

    #[test]
    fn test_duplicate_input_connection_rejected() {
        let mut pipeline = Pipeline::new();
        pipeline.add_process("ramp1", RampSource { next: 0, end: 0 }).unwrap();
        pipeline.add_process("ramp2", RampSource { next: 0, end: 0 }).unwrap();
        pipeline.add_process("formatter", formatter()).unwrap();

        pipeline.connect("ramp1", "samples", "formatter", "samples").unwrap();
        let err = pipeline
            .connect("ramp2", "samples", "formatter", "samples")
            .unwrap_err();
        assert!(err.to_string().contains("already connected"));
    }

    #[test]
    fn test_fan_out_allowed() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::new();
        pipeline.add_process("formatter", formatter()).unwrap();
        pipeline.add_process("sink1", sink(&lines)).unwrap();
        pipeline.add_process("sink2", sink(&lines)).unwrap();
        assert!(pipeline.connect("formatter", "link", "sink1", "link").is_ok());
        assert!(pipeline.connect("formatter", "link", "sink2", "link").is_ok());
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::new();
        pipeline.add_process("ramp", RampSource { next: 0, end: 0 }).unwrap();
        pipeline.add_process("sink", sink(&lines)).unwrap();
        let err = pipeline.connect("ramp", "samples", "sink", "link").unwrap_err();
        assert!(matches!(err, ConnectionError::TypeMismatch { .. }));
    }

    #[test]
    fn test_unknown_node_and_port() {
        let mut pipeline = Pipeline::new();
        pipeline.add_process("ramp", RampSource { next: 0, end: 0 }).unwrap();
        pipeline.add_process("formatter", formatter()).unwrap();

        assert!(matches!(
            pipeline.connect("ramp", "samples", "nowhere", "samples"),
            Err(ConnectionError::NodeNotFound(_))
        ));
        assert!(matches!(
            pipeline.connect("ramp", "volts", "formatter", "samples"),
            Err(ConnectionError::PortNotFound { .. })
        ));
    }

    #[test]
    fn test_duplicate_node_name_rejected() {
        let mut pipeline = Pipeline::new();
        pipeline.add_process("ramp", RampSource { next: 0, end: 0 }).unwrap();
        let err = pipeline
            .add_process("ramp", RampSource { next: 0, end: 0 })
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn test_list_nodes_and_ports() {
        let mut pipeline = Pipeline::new();
        pipeline.add_process("ramp", RampSource { next: 0, end: 0 }).unwrap();
        pipeline.add_process("formatter", formatter()).unwrap();

        let mut nodes = pipeline.list_nodes();
        nodes.sort_unstable();
        assert_eq!(nodes, vec!["formatter", "ramp"]);
        assert_eq!(pipeline.list_node_outputs("formatter").unwrap()[0].name, "link");
        assert!(pipeline.list_node_inputs("ramp").unwrap().is_empty());
    }
}
