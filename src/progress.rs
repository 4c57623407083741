/// Progress and continue/abort sink of a transfer.
///
/// The handler receives the fraction done, never decreasing. The confirm
/// callback is asked whether to go on with the next record after a
/// non-fatal error; without one, transfers abort on the first error.
pub struct TransferProgress<'a> {
	handler: Option<Box<dyn FnMut(f32) + 'a>>,
	confirm: Option<Box<dyn FnMut(&failure::Error) -> bool + 'a>>,
	fraction: f32,
}

impl<'a> TransferProgress<'a> {
	/// no reporting, abort on errors
	pub fn new() -> Self {
		TransferProgress {
			handler: None,
			confirm: None,
			fraction: 0.0,
		}
	}

	pub fn with_handler(mut self, handler: impl FnMut(f32) + 'a) -> Self {
		self.handler = Some(Box::new(handler));
		self
	}

	pub fn with_confirm(mut self, confirm: impl FnMut(&failure::Error) -> bool + 'a) -> Self {
		self.confirm = Some(Box::new(confirm));
		self
	}

	pub fn fraction(&self) -> f32 {
		self.fraction
	}

	pub fn update(&mut self, done: usize, total: usize) {
		let fraction = if total == 0 { 1.0 } else { (done as f32 / total as f32).min(1.0) };
		if fraction < self.fraction {
			return;
		}
		self.fraction = fraction;
		if let Some(handler) = self.handler.as_mut() {
			handler(fraction);
		}
	}

	pub fn finish(&mut self) {
		self.update(1, 1);
	}

	/// whether to continue after `error`
	pub fn confirm(&mut self, error: &failure::Error) -> bool {
		match self.confirm.as_mut() {
			Some(confirm) => confirm(error),
			None => false,
		}
	}
}

impl<'a> Default for TransferProgress<'a> {
	fn default() -> Self {
		TransferProgress::new()
	}
}
